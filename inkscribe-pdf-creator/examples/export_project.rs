//! Write a text file into a PDF in a handwriting font.
//!
//! Usage: cargo run --example export_project -- <source.pdf> <font.ttf> <text.txt> <output.pdf>
//!
//! Text that does not fit the first page flows onto the following ones.

use std::time::Instant;

use anyhow::{bail, Context, Result};
use inkscribe_pdf_creator::{
    Compositor, EditorSettings, EmbeddableFont, FontFormat, FontRecord, Project,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [source_path, font_path, text_path, output_path] = args.as_slice() else {
        bail!("usage: export_project <source.pdf> <font.ttf> <text.txt> <output.pdf>");
    };

    let source_pdf =
        std::fs::read(source_path).with_context(|| format!("failed to read {}", source_path))?;
    let font_bytes =
        std::fs::read(font_path).with_context(|| format!("failed to read {}", font_path))?;
    let text =
        std::fs::read_to_string(text_path).with_context(|| format!("failed to read {}", text_path))?;

    let font = EmbeddableFont::from_bytes(font_bytes)?;
    let format = font.format();
    let compositor = Compositor::new(&source_pdf, font)?;
    let page_sizes = compositor.page_sizes()?;
    let page_count = page_sizes.len() as u32;
    println!("{} has {} pages", source_path, page_count);

    let record = FontRecord {
        id: "local".into(),
        name: font_path.clone(),
        source_url: font_path.clone(),
        format,
        bytes: None,
    };
    let mut project = Project::new(
        "local",
        record,
        source_path.clone(),
        &page_sizes,
        &EditorSettings::default(),
    );
    let filled = project.edit_page(1, &text, Instant::now())?;
    if !filled.is_empty() {
        println!("Text continued onto pages {:?}", filled);
    }
    if let Some(overflow) = project.session().record(page_count) {
        println!(
            "{} lines did not fit on the last page",
            overflow.overflow_lines.len()
        );
    }

    let output = compositor.compose(project.pages())?;
    std::fs::write(output_path, &output)
        .with_context(|| format!("failed to write {}", output_path))?;

    let kind = match format {
        FontFormat::Ttf => "TrueType",
        FontFormat::Otf => "OpenType",
    };
    println!(
        "Wrote {} ({} bytes, {} font embedded)",
        output_path,
        output.len(),
        kind
    );
    Ok(())
}
