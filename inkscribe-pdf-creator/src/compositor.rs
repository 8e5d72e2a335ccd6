//! Burns laid-out handwriting into an existing PDF
//!
//! The compositor loads the source document, embeds the handwriting font once
//! as a composite Type0 font and appends an overlay content stream to every
//! page that has text. Layout goes through [`crate::typography`] again, with
//! the real MediaBox substituted into the page geometry, so the breaks are the
//! ones the preview showed.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::error::{InkError, Result};
use crate::fonts::{smoke_test, EmbeddableFont, FontFormat};
use crate::settings::PageContent;
use crate::typography::{embolden_offset, layout_page, layout_with, place_glyphs, PageLayout};

/// Resource name of the embedded handwriting font on every page.
const FONT_RESOURCE: &str = "FInk";

const PRODUCER: &str = "InkScribe PDF Compositor";

/// Bound on `/Parent` hops when looking up inherited page attributes.
const MAX_INHERITANCE_DEPTH: usize = 10;

/// Size the smoke test measures its test glyph at.
const SMOKE_TEST_FONT_SIZE: f32 = 12.0;

/// A page's MediaBox, in default user space units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

pub struct Compositor {
    document: Document,
    font: EmbeddableFont,
}

impl Compositor {
    /// Parse the source PDF. Fails with [`InkError::PdfRead`] if it is not a
    /// readable PDF.
    pub fn new(source_pdf: &[u8], font: EmbeddableFont) -> Result<Self> {
        let document = Document::load_mem(source_pdf)?;
        log::debug!(
            "Loaded source PDF {} with {} pages",
            document.version,
            document.get_pages().len()
        );
        Ok(Compositor { document, font })
    }

    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// MediaBox of the 1-based page `page_number`, following inheritance.
    pub fn media_box(&self, page_number: u32) -> Result<MediaBox> {
        let page_id = self.page_id(page_number)?;
        media_box_of(&self.document, page_id)
    }

    /// MediaBoxes of every page, in page order.
    pub fn page_sizes(&self) -> Result<Vec<MediaBox>> {
        document_page_sizes(&self.document)
    }

    fn page_id(&self, page_number: u32) -> Result<ObjectId> {
        self.document
            .get_pages()
            .get(&page_number)
            .copied()
            .ok_or(InkError::PageNotFound(page_number))
    }

    /// Draw every page's text and return the finished document.
    ///
    /// Aborts without output if the font cannot be embedded.
    pub fn compose(mut self, pages: &[PageContent]) -> Result<Vec<u8>> {
        let sample = smoke_test(&self.font, SMOKE_TEST_FONT_SIZE)?;
        log::debug!("Font passed the smoke test with {:?}", sample);

        let font_id = self.embed_font()?;
        let page_ids = self.document.get_pages();

        let mut drawn = 0;
        for content in pages {
            let Some(&page_id) = page_ids.get(&content.page_number) else {
                log::warn!(
                    "The source PDF has no page {}, skipping its text",
                    content.page_number
                );
                continue;
            };

            let media_box = media_box_of(&self.document, page_id)?;
            let geometry = content
                .geometry
                .with_page_size(media_box.width, media_box.height);
            let layout = layout_with(content, &geometry);
            if layout.lines.iter().all(|line| line.text.trim().is_empty()) {
                continue;
            }
            if !same_breaks(&layout, &layout_page(content)) {
                return Err(InkError::PageSizeMismatch {
                    page_number: content.page_number,
                    laid_out: (content.geometry.page_width, content.geometry.page_height),
                    actual: (media_box.width, media_box.height),
                });
            }
            if let Some(overflow) = &layout.overflow {
                log::debug!(
                    "Page {}: {} lines beyond the budget are not drawn here",
                    content.page_number,
                    overflow.overflow_lines.len()
                );
            }

            let overlay = self.overlay_operations(content, &layout, &media_box)?;
            self.add_font_to_page(page_id, font_id)?;
            self.append_overlay(page_id, overlay)?;
            drawn += 1;
        }

        self.set_producer()?;
        self.document.compress();

        let mut output = Vec::new();
        self.document
            .save_to(&mut output)
            .map_err(|error| InkError::PdfWrite(error.to_string()))?;

        log::info!(
            "Composited handwriting onto {} of {} pages ({} bytes)",
            drawn,
            page_ids.len(),
            output.len()
        );
        Ok(output)
    }

    fn overlay_operations(
        &self,
        content: &PageContent,
        layout: &PageLayout,
        media_box: &MediaBox,
    ) -> Result<Vec<u8>> {
        let style = &content.style;
        let embolden = embolden_offset(style);

        // Close the q the original content was wrapped in
        let mut operations = vec![Operation::new("Q", vec![]), Operation::new("q", vec![])];
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new(
            "Tf",
            vec![
                Object::Name(FONT_RESOURCE.as_bytes().to_vec()),
                Object::Real(style.font_size),
            ],
        ));
        if embolden > 0.0 {
            // Fill and stroke thickens each glyph outline
            operations.push(Operation::new("Tr", vec![Object::Integer(2)]));
            operations.push(Operation::new("w", vec![Object::Real(embolden)]));
        }

        for line in &layout.lines {
            let [r, g, b] = line.color.pdf_rgb();
            let rgb = vec![Object::Real(r), Object::Real(g), Object::Real(b)];
            operations.push(Operation::new("rg", rgb.clone()));
            if embolden > 0.0 {
                operations.push(Operation::new("RG", rgb));
            }

            let baseline = media_box.y + media_box.height - line.y_position;
            let origin = media_box.x + content.geometry.margin_left;

            for glyph in place_glyphs(&line.text, origin, &self.font, style) {
                if glyph.ch.is_whitespace() {
                    continue;
                }
                let glyph_id = self
                    .font
                    .glyph_id(glyph.ch)
                    .filter(|&id| id != 0)
                    .unwrap_or_else(|| self.font.fallback_glyph_id());

                operations.push(Operation::new(
                    "Tm",
                    vec![
                        Object::Real(1.0),
                        Object::Real(0.0),
                        Object::Real(0.0),
                        Object::Real(1.0),
                        Object::Real(glyph.x),
                        Object::Real(baseline),
                    ],
                ));
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::String(
                        glyph_id.to_be_bytes().to_vec(),
                        StringFormat::Hexadecimal,
                    )],
                ));
            }
        }

        operations.push(Operation::new("ET", vec![]));
        operations.push(Operation::new("Q", vec![]));

        Content { operations }
            .encode()
            .map_err(|error| InkError::PdfWrite(error.to_string()))
    }

    /// Wrap the page's existing content in `q`/`Q` and append the overlay.
    fn append_overlay(&mut self, page_id: ObjectId, overlay: Vec<u8>) -> Result<()> {
        let existing = match self.document.get_dictionary(page_id)?.get(b"Contents") {
            Ok(Object::Array(items)) => items.clone(),
            Ok(reference @ Object::Reference(_)) => vec![reference.clone()],
            Ok(_) | Err(_) => Vec::new(),
        };

        let save_id = self
            .document
            .add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let overlay_id = self
            .document
            .add_object(Stream::new(Dictionary::new(), overlay));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(save_id));
        contents.extend(existing);
        contents.push(Object::Reference(overlay_id));

        self.document
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Contents", Object::Array(contents));
        Ok(())
    }

    fn embed_font(&mut self) -> Result<ObjectId> {
        let base_font = self.font.postscript_name();
        let metrics = self.font.descriptor_metrics();
        let program = self.font.program().to_vec();

        let (descendant_subtype, file_key, font_file) = match self.font.format() {
            FontFormat::Ttf => {
                let mut dict = Dictionary::new();
                dict.set("Length1", Object::Integer(program.len() as i64));
                ("CIDFontType2", "FontFile2", Stream::new(dict, program))
            }
            FontFormat::Otf => {
                let mut dict = Dictionary::new();
                dict.set("Subtype", Object::Name(b"OpenType".to_vec()));
                ("CIDFontType0", "FontFile3", Stream::new(dict, program))
            }
        };
        let font_file_id = self.document.add_object(font_file);

        let mut descriptor = Dictionary::new();
        descriptor.set("Type", Object::Name(b"FontDescriptor".to_vec()));
        descriptor.set("FontName", Object::Name(base_font.clone().into_bytes()));
        descriptor.set("Flags", Object::Integer(metrics.flags));
        descriptor.set(
            "FontBBox",
            Object::Array(metrics.bbox.iter().map(|&v| Object::Integer(v)).collect()),
        );
        descriptor.set("ItalicAngle", Object::Integer(0));
        descriptor.set("Ascent", Object::Integer(metrics.ascent));
        descriptor.set("Descent", Object::Integer(metrics.descent));
        descriptor.set("CapHeight", Object::Integer(metrics.cap_height));
        descriptor.set("StemV", Object::Integer(80));
        descriptor.set(file_key, Object::Reference(font_file_id));
        let descriptor_id = self.document.add_object(descriptor);

        let mut cid_system_info = Dictionary::new();
        cid_system_info.set("Registry", Object::string_literal("Adobe"));
        cid_system_info.set("Ordering", Object::string_literal("Identity"));
        cid_system_info.set("Supplement", Object::Integer(0));

        let mut cid_font = Dictionary::new();
        cid_font.set("Type", Object::Name(b"Font".to_vec()));
        cid_font.set("Subtype", Object::Name(descendant_subtype.as_bytes().to_vec()));
        cid_font.set("BaseFont", Object::Name(base_font.clone().into_bytes()));
        cid_font.set("CIDSystemInfo", Object::Dictionary(cid_system_info));
        cid_font.set("FontDescriptor", Object::Reference(descriptor_id));
        cid_font.set("DW", Object::Integer(self.default_width()));
        cid_font.set("W", Object::Array(self.widths_array()));
        if self.font.format() == FontFormat::Ttf {
            cid_font.set("CIDToGIDMap", Object::Name(b"Identity".to_vec()));
        }
        let cid_font_id = self.document.add_object(cid_font);

        let to_unicode_id = self.document.add_object(self.to_unicode_stream()?);

        let mut type0 = Dictionary::new();
        type0.set("Type", Object::Name(b"Font".to_vec()));
        type0.set("Subtype", Object::Name(b"Type0".to_vec()));
        type0.set("BaseFont", Object::Name(base_font.clone().into_bytes()));
        type0.set("Encoding", Object::Name(b"Identity-H".to_vec()));
        type0.set(
            "DescendantFonts",
            Object::Array(vec![Object::Reference(cid_font_id)]),
        );
        type0.set("ToUnicode", Object::Reference(to_unicode_id));

        log::debug!(
            "Embedded {} ({:?}, {} bytes, not subset)",
            base_font,
            self.font.format(),
            self.font.program().len()
        );
        Ok(self.document.add_object(type0))
    }

    fn default_width(&self) -> i64 {
        match self.font.glyph_id(' ') {
            Some(space) => self
                .font
                .to_pdf_units(self.font.advance_units(space) as i32),
            None => 1000,
        }
    }

    /// `[first [w1 w2 ...] ...]` covering every mapped glyph, grouped into
    /// runs of consecutive glyph ids.
    fn widths_array(&self) -> Vec<Object> {
        let mut result = Vec::new();
        let mut run_start: Option<u16> = None;
        let mut previous = 0u16;
        let mut widths: Vec<Object> = Vec::new();

        for &glyph_id in self.font.glyph_map().keys() {
            let width = self
                .font
                .to_pdf_units(self.font.advance_units(glyph_id) as i32);

            match run_start {
                Some(_) if glyph_id == previous.wrapping_add(1) => {}
                Some(start) => {
                    result.push(Object::Integer(start as i64));
                    result.push(Object::Array(std::mem::take(&mut widths)));
                    run_start = Some(glyph_id);
                }
                None => run_start = Some(glyph_id),
            }
            widths.push(Object::Integer(width));
            previous = glyph_id;
        }

        if let Some(start) = run_start {
            result.push(Object::Integer(start as i64));
            result.push(Object::Array(widths));
        }
        result
    }

    /// ToUnicode CMap mapping every glyph back to its character, so text
    /// stays searchable and copyable.
    fn to_unicode_stream(&self) -> Result<Stream> {
        let mut map = String::from(
            "/CIDInit /ProcSet findresource begin\n\
             12 dict begin\n\
             begincmap\n\
             /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
             /CMapName /Adobe-Identity-UCS def\n\
             /CMapType 2 def\n\
             1 begincodespacerange\n\
             <0000> <FFFF>\n\
             endcodespacerange\n",
        );

        let glyphs: Vec<(u16, char)> = self.font.glyph_map().into_iter().collect();
        // bfchar blocks hold at most 100 entries
        for block in glyphs.chunks(100) {
            map.push_str(&format!("{} beginbfchar\n", block.len()));
            for &(glyph_id, ch) in block {
                let mut units = [0u16; 2];
                let utf16: String = ch
                    .encode_utf16(&mut units)
                    .iter()
                    .map(|unit| format!("{:04X}", unit))
                    .collect();
                map.push_str(&format!("<{:04X}> <{}>\n", glyph_id, utf16));
            }
            map.push_str("endbfchar\n");
        }
        map.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(map.as_bytes())?;
        let compressed = encoder.finish()?;

        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        Ok(Stream::new(dict, compressed))
    }

    /// Register the font under [`FONT_RESOURCE`] in the page's resources. The
    /// resources are resolved first (inline, referenced or inherited) and
    /// written back inline on the page.
    fn add_font_to_page(&mut self, page_id: ObjectId, font_id: ObjectId) -> Result<()> {
        let mut resources = inherited(&self.document, page_id, b"Resources")
            .and_then(|object| self.resolve_dict(&object))
            .unwrap_or_else(Dictionary::new);

        let mut fonts = resources
            .get(b"Font")
            .ok()
            .and_then(|object| self.resolve_dict(object))
            .unwrap_or_else(Dictionary::new);
        fonts.set(FONT_RESOURCE, Object::Reference(font_id));
        resources.set("Font", Object::Dictionary(fonts));

        self.document
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Resources", Object::Dictionary(resources));
        Ok(())
    }

    fn resolve_dict(&self, object: &Object) -> Option<Dictionary> {
        match object {
            Object::Dictionary(dict) => Some(dict.clone()),
            Object::Reference(id) => match self.document.get_object(*id) {
                Ok(Object::Dictionary(dict)) => Some(dict.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    fn set_producer(&mut self) -> Result<()> {
        let info_id = match self.document.trailer.get(b"Info") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        };

        match info_id {
            Some(id) => {
                self.document
                    .get_object_mut(id)?
                    .as_dict_mut()?
                    .set("Producer", Object::string_literal(PRODUCER));
            }
            None => {
                let mut info = Dictionary::new();
                info.set("Producer", Object::string_literal(PRODUCER));
                let id = self.document.add_object(info);
                self.document.trailer.set("Info", Object::Reference(id));
            }
        }
        Ok(())
    }
}

/// Whether both layouts put the same text on the same lines.
fn same_breaks(export: &PageLayout, edited: &PageLayout) -> bool {
    export
        .lines
        .iter()
        .map(|line| line.text.as_str())
        .eq(edited.lines.iter().map(|line| line.text.as_str()))
        && export.overflow_lines() == edited.overflow_lines()
}

/// Look `key` up on the page, then up the page tree.
fn inherited(document: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut node_id = page_id;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        let node = document.get_dictionary(node_id).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        node_id = node.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

fn media_box_of(document: &Document, page_id: ObjectId) -> Result<MediaBox> {
    let object = inherited(document, page_id, b"MediaBox")
        .ok_or_else(|| InkError::PdfRead(format!("page {:?} has no MediaBox", page_id)))?;
    let object = match object {
        Object::Reference(id) => document.get_object(id)?.clone(),
        other => other,
    };

    let values = object
        .as_array()?
        .iter()
        .map(|value| value.as_float())
        .collect::<std::result::Result<Vec<f32>, _>>()?;
    let &[x0, y0, x1, y1] = values.as_slice() else {
        return Err(InkError::PdfRead(format!(
            "MediaBox of page {:?} has {} entries",
            page_id,
            values.len()
        )));
    };

    Ok(MediaBox {
        x: x0.min(x1),
        y: y0.min(y1),
        width: (x1 - x0).abs(),
        height: (y1 - y0).abs(),
    })
}

fn document_page_sizes(document: &Document) -> Result<Vec<MediaBox>> {
    document
        .get_pages()
        .values()
        .map(|&page_id| media_box_of(document, page_id))
        .collect()
}

/// Page sizes of `source_pdf`, so pages can be laid out for the sheets they
/// will be printed on.
pub fn page_sizes(source_pdf: &[u8]) -> Result<Vec<MediaBox>> {
    let document = Document::load_mem(source_pdf)?;
    document_page_sizes(&document)
}

/// Composite `pages` onto `source_pdf` with `font`.
pub fn compose_pdf(source_pdf: &[u8], font: EmbeddableFont, pages: &[PageContent]) -> Result<Vec<u8>> {
    Compositor::new(source_pdf, font)?.compose(pages)
}
