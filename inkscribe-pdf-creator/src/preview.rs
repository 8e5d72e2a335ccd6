//! On-screen preview of a page
//!
//! The renderer keeps one page's content and its current layout. Every edit
//! re-runs the layout synchronously; persistence is debounced elsewhere.
//! Whenever the lines spilling off the page change, the registered overflow
//! callback fires so the overflow controller can react.

use crate::fonts::RenderableFont;
use crate::overflow::OverflowRecord;
use crate::palette::InkColor;
use crate::settings::{PageContent, PageGeometry, TextStyle};
use crate::typography::{embolden_offset, layout_page, place_glyphs, PageLayout, WrappedLine};

/// An RGBA8 page raster, row-major, four bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl PageImage {
    /// Wrap a raw buffer. Returns `None` if its length does not match the size.
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Option<Self> {
        if rgba.len() == width as usize * height as usize * 4 {
            Some(PageImage {
                width,
                height,
                rgba,
            })
        } else {
            None
        }
    }

    /// An opaque white sheet.
    pub fn blank(width: u32, height: u32) -> Self {
        PageImage {
            width,
            height,
            rgba: vec![255; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn into_rgba(self) -> Vec<u8> {
        self.rgba
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let mut pixel = [0u8; 4];
        pixel.copy_from_slice(&self.rgba[offset..offset + 4]);
        Some(pixel)
    }

    /// Blend `ink` over the pixel at (`x`, `y`) with `coverage` as alpha.
    fn blend(&mut self, x: i64, y: i64, ink: [u8; 3], coverage: u8) {
        if coverage == 0 || x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let alpha = coverage as u32;
        for channel in 0..3 {
            let under = self.rgba[offset + channel] as u32;
            self.rgba[offset + channel] =
                ((ink[channel] as u32 * alpha + under * (255 - alpha) + 127) / 255) as u8;
        }
        self.rgba[offset + 3] = self.rgba[offset + 3].max(coverage);
    }
}

type OverflowCallback = Box<dyn FnMut(&OverflowRecord) + Send>;

pub struct PreviewRenderer {
    page: PageContent,
    font: RenderableFont,
    layout: PageLayout,
    last_overflow: Vec<String>,
    on_overflow: Option<OverflowCallback>,
}

impl PreviewRenderer {
    pub fn new(page: PageContent, font: RenderableFont) -> Self {
        let layout = layout_page(&page);
        let last_overflow = layout.overflow_lines().to_vec();
        PreviewRenderer {
            page,
            font,
            layout,
            last_overflow,
            on_overflow: None,
        }
    }

    pub fn page(&self) -> &PageContent {
        &self.page
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn lines(&self) -> &[WrappedLine] {
        &self.layout.lines
    }

    /// Called with the page's overflow whenever it changes. A record with no
    /// lines means the overflow resolved.
    pub fn on_overflow<F>(&mut self, callback: F)
    where
        F: FnMut(&OverflowRecord) + Send + 'static,
    {
        self.on_overflow = Some(Box::new(callback));
    }

    pub fn set_text(&mut self, text: &str) {
        self.page.raw_text = text.to_string();
        self.relayout();
    }

    /// Returns `false` and keeps the previous layout if `style` has
    /// non-finite numbers.
    pub fn set_style(&mut self, style: TextStyle) -> bool {
        if !style.is_finite() {
            log::warn!("Ignoring non-finite text style {:?}", style);
            return false;
        }
        self.page.style = style;
        self.relayout();
        true
    }

    /// Returns `false` and keeps the previous layout if `geometry` has
    /// non-finite numbers.
    pub fn set_geometry(&mut self, geometry: PageGeometry) -> bool {
        if !geometry.is_finite() {
            log::warn!("Ignoring non-finite page geometry {:?}", geometry);
            return false;
        }
        self.page.geometry = geometry;
        self.relayout();
        true
    }

    /// Swap in content written from outside, e.g. by overflow propagation.
    pub fn replace_page(&mut self, page: PageContent) {
        self.page = page;
        self.relayout();
    }

    /// Advance the ink of line `index` and return it.
    pub fn cycle_line_color(&mut self, index: usize) -> InkColor {
        let ink = self.page.cycle_line_color(index);
        if let Some(line) = self.layout.lines.get_mut(index) {
            line.color = ink;
        }
        ink
    }

    fn relayout(&mut self) {
        self.layout = layout_page(&self.page);

        let overflow = self.layout.overflow_lines();
        if overflow == self.last_overflow.as_slice() {
            return;
        }
        self.last_overflow = overflow.to_vec();

        let record = self.layout.overflow.clone().unwrap_or_else(|| {
            OverflowRecord::resolved(self.page.page_number, self.layout.lines.len())
        });
        log::debug!(
            "Page {} overflow changed to {} lines",
            record.source_page_number,
            record.overflow_lines.len()
        );
        if let Some(callback) = self.on_overflow.as_mut() {
            callback(&record);
        }
    }

    /// Draw the current lines over a copy of `background`.
    ///
    /// The background is scaled from page points by `width / page_width`, and
    /// glyphs are rasterised at the scaled size so they land where the PDF
    /// draws them.
    pub fn render(&self, background: &PageImage) -> PageImage {
        let mut image = background.clone();
        let geometry = &self.page.geometry;
        let style = &self.page.style;
        if !(geometry.page_width > 0.0) {
            return image;
        }

        let scale = background.width as f32 / geometry.page_width;
        let pixel_size = style.font_size * scale;
        if !(pixel_size > 0.0) {
            return image;
        }
        let embolden = embolden_offset(style) * scale;

        for line in &self.layout.lines {
            let ink = line.color.rgb();
            let baseline = line.y_position * scale;

            for glyph in place_glyphs(&line.text, geometry.margin_left, &self.font, style) {
                if glyph.ch.is_whitespace() {
                    continue;
                }
                let (metrics, coverage) = self.font.rasterize(glyph.ch, pixel_size);
                let left = glyph.x * scale + metrics.xmin as f32;
                let top = baseline - (metrics.height as f32 + metrics.ymin as f32);

                let mut passes = vec![0.0];
                if embolden > 0.0 {
                    // Faux bold: a second pass nudged right
                    passes.push(embolden);
                }
                for offset in passes {
                    let origin_x = (left + offset).round() as i64;
                    let origin_y = top.round() as i64;
                    for row in 0..metrics.height {
                        for column in 0..metrics.width {
                            let alpha = coverage[row * metrics.width + column];
                            image.blend(
                                origin_x + column as i64,
                                origin_y + row as i64,
                                ink,
                                alpha,
                            );
                        }
                    }
                }
            }
        }

        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_of_the_wrong_size_are_rejected() {
        assert!(PageImage::from_rgba(2, 2, vec![0; 15]).is_none());
        assert!(PageImage::from_rgba(2, 2, vec![0; 16]).is_some());
    }

    #[test]
    fn full_coverage_replaces_the_pixel() {
        let mut image = PageImage::blank(1, 1);
        image.blend(0, 0, [10, 20, 30], 255);
        assert_eq!(image.pixel(0, 0), Some([10, 20, 30, 255]));
    }

    #[test]
    fn partial_coverage_mixes_with_the_background() {
        let mut image = PageImage::blank(1, 1);
        image.blend(0, 0, [0, 0, 0], 128);
        let [r, _, _, _] = image.pixel(0, 0).expect("in bounds");
        assert!(r > 120 && r < 135, "got {}", r);
    }

    #[test]
    fn out_of_bounds_blends_are_ignored() {
        let mut image = PageImage::blank(2, 2);
        image.blend(-1, 0, [0, 0, 0], 255);
        image.blend(2, 1, [0, 0, 0], 255);
        assert!(image.as_rgba().iter().all(|&byte| byte == 255));
    }
}
