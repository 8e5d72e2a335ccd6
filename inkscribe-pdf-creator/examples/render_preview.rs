//! Render a page preview to a PPM image.
//!
//! Usage: cargo run --example render_preview -- <font.ttf> <output.ppm> [text]

use std::io::Write;

use anyhow::{bail, Context, Result};
use inkscribe_pdf_creator::{
    EditorSettings, PageContent, PageImage, PreviewRenderer, RenderableFont,
};

const DEFAULT_TEXT: &str = "Dear diary,\nthe quick brown fox jumps over the lazy dog.";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (font_path, output_path, text) = match args.as_slice() {
        [font, output] => (font, output, DEFAULT_TEXT.to_string()),
        [font, output, text] => (font, output, text.replace("\\n", "\n")),
        _ => bail!("usage: render_preview <font.ttf> <output.ppm> [text]"),
    };

    let font_bytes =
        std::fs::read(font_path).with_context(|| format!("failed to read {}", font_path))?;
    let font = RenderableFont::from_bytes(font_bytes)?;

    let settings = EditorSettings::default();
    let page = PageContent::new(1, settings.geometry, settings.style);
    let mut preview = PreviewRenderer::new(page, font);
    preview.on_overflow(|record| {
        println!(
            "{} lines spill past page {}",
            record.overflow_lines.len(),
            record.source_page_number
        )
    });
    preview.set_text(&text);

    for line in preview.lines() {
        println!("{:>3} {:>7.1}  {}", line.index, line.y_position, line.text);
    }

    // 1.5 pixels per point
    let width = (settings.geometry.page_width * 1.5) as u32;
    let height = (settings.geometry.page_height * 1.5) as u32;
    let image = preview.render(&PageImage::blank(width, height));

    let mut file = std::fs::File::create(output_path)
        .with_context(|| format!("failed to create {}", output_path))?;
    write!(file, "P6\n{} {}\n255\n", image.width(), image.height())?;
    let rgb: Vec<u8> = image
        .as_rgba()
        .chunks_exact(4)
        .flat_map(|pixel| pixel[..3].to_vec())
        .collect();
    file.write_all(&rgb)?;

    println!("Wrote {}x{} preview to {}", image.width(), image.height(), output_path);
    Ok(())
}
