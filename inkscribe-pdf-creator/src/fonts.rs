//! Font resolution for both rendering paths
//!
//! A handwriting font arrives as raw bytes (uploaded or bundled) and is turned
//! into one of two handles:
//!
//! * [`RenderableFont`] wraps a fontdue face for the preview. It measures and
//!   rasterises glyphs on screen.
//! * [`EmbeddableFont`] wraps the owned sfnt tables for the compositor. It
//!   supplies glyph ids, advances and descriptor metrics, and it hands back the
//!   untouched font program so the PDF embeds every glyph.
//!
//! Both implement [`GlyphMeasure`], the seam the shared glyph placement in
//! [`crate::typography`] goes through. Both parse the same bytes, so a glyph
//! advances by the same amount on screen and on paper.

use std::collections::BTreeMap;

use fontdue::{Font, FontSettings, LineMetrics, Metrics};
use owned_ttf_parser::{name_id, AsFaceRef, Face, GlyphId, OwnedFace};
use serde::{Deserialize, Serialize};

use crate::error::{InkError, Result};
use crate::storage::{fetch_with_retry, SourceFetch};

/// Uploads above this size are rejected before parsing.
pub const MAX_FONT_BYTES: usize = 5 * 1024 * 1024;

const TRUETYPE_MAGIC: [u8; 4] = [0x00, 0x01, 0x00, 0x00];
const OPENTYPE_MAGIC: [u8; 4] = *b"OTTO";

/// Characters tried, in order, by the embedding smoke test.
const SMOKE_TEST_CHARACTERS: [char; 4] = ['a', 'A', '0', 'x'];

/// Outline flavour of an accepted font.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontFormat {
    /// `glyf` outlines, embedded as FontFile2
    Ttf,
    /// CFF outlines, embedded as FontFile3/OpenType
    Otf,
}

/// Inspect the sfnt header of `bytes`.
pub fn validate(bytes: &[u8]) -> Result<FontFormat> {
    if bytes.len() > MAX_FONT_BYTES {
        return Err(InkError::FontTooLarge {
            size: bytes.len(),
            limit: MAX_FONT_BYTES,
        });
    }

    match bytes.get(..4) {
        Some(magic) if magic == TRUETYPE_MAGIC => Ok(FontFormat::Ttf),
        Some(magic) if magic == OPENTYPE_MAGIC => Ok(FontFormat::Otf),
        _ => Err(InkError::InvalidFontFormat),
    }
}

/// A font a project refers to by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FontRecord {
    pub id: String,
    pub name: String,
    pub source_url: String,
    pub format: FontFormat,
    /// Bytes already in memory, e.g. for bundled fonts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
}

impl FontRecord {
    /// The font program, from memory or fetched from `source_url`.
    pub fn resolve_bytes(&self, fetcher: &dyn SourceFetch) -> Result<Vec<u8>> {
        match &self.bytes {
            Some(bytes) => Ok(bytes.clone()),
            None => fetch_with_retry(fetcher, &self.source_url),
        }
    }
}

/// Horizontal measurement the layout needs from a font.
pub trait GlyphMeasure {
    /// Advance width of `ch` at `font_size`, in points.
    fn advance(&self, ch: char, font_size: f32) -> f32;

    /// Whether the font maps `ch` to a real glyph.
    fn has_glyph(&self, ch: char) -> bool;
}

/// Find a test character and check it measures a positive width. Guards
/// against fonts whose tables parse but yield nothing drawable.
pub fn smoke_test<M: GlyphMeasure + ?Sized>(measure: &M, font_size: f32) -> Result<char> {
    let sample = SMOKE_TEST_CHARACTERS
        .iter()
        .copied()
        .find(|&ch| measure.has_glyph(ch))
        .ok_or_else(|| {
            InkError::FontEmbedError("the font maps none of the basic Latin test characters".into())
        })?;

    let width = measure.advance(sample, font_size);
    if width > 0.0 && width.is_finite() {
        Ok(sample)
    } else {
        Err(InkError::FontEmbedError(format!(
            "glyph {:?} measures {} wide",
            sample, width
        )))
    }
}

/// First decodable entry of the `name` table among `ids`, in order.
fn face_name(face: &Face<'_>, ids: &[u16]) -> Option<String> {
    ids.iter().find_map(|&id| {
        face.names()
            .into_iter()
            .filter(|name| name.name_id == id)
            .find_map(|name| name.to_string())
    })
}

/// Screen-side handle used by the preview renderer.
#[derive(Clone)]
pub struct RenderableFont {
    font: Font,
    format: FontFormat,
    name: Option<String>,
}

impl RenderableFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let format = validate(&bytes)?;
        let name = Face::parse(&bytes, 0)
            .ok()
            .and_then(|face| face_name(&face, &[name_id::FULL_NAME, name_id::FAMILY]));
        let font = Font::from_bytes(bytes.as_slice(), FontSettings::default())
            .map_err(|error| InkError::FontEmbedError(error.to_string()))?;

        log::debug!(
            "Loaded renderable font {:?} ({:?}, {} glyphs)",
            name.as_deref().unwrap_or("unnamed"),
            format,
            font.glyph_count()
        );

        Ok(RenderableFont { font, format, name })
    }

    pub fn format(&self) -> FontFormat {
        self.format
    }

    /// Full name from the font's `name` table, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Glyph metrics in pixels at `px` pixels per em.
    pub fn metrics(&self, ch: char, px: f32) -> Metrics {
        self.font.metrics(ch, px)
    }

    /// Coverage bitmap (one byte per pixel) and its metrics.
    pub fn rasterize(&self, ch: char, px: f32) -> (Metrics, Vec<u8>) {
        self.font.rasterize(ch, px)
    }

    pub fn line_metrics(&self, px: f32) -> Option<LineMetrics> {
        self.font.horizontal_line_metrics(px)
    }
}

impl GlyphMeasure for RenderableFont {
    fn advance(&self, ch: char, font_size: f32) -> f32 {
        self.font.metrics(ch, font_size).advance_width
    }

    fn has_glyph(&self, ch: char) -> bool {
        self.font.lookup_glyph_index(ch) != 0
    }
}

/// Fetch `url` (retrying once) and open it for the preview.
pub fn load(fetcher: &dyn SourceFetch, url: &str) -> Result<RenderableFont> {
    let bytes = fetch_with_retry(fetcher, url)?;
    RenderableFont::from_bytes(bytes)
}

/// Export-side handle. Owns the complete font program.
pub struct EmbeddableFont {
    face: OwnedFace,
    format: FontFormat,
}

impl EmbeddableFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let format = validate(&bytes)?;
        let face = OwnedFace::from_vec(bytes, 0)
            .map_err(|error| InkError::FontEmbedError(error.to_string()))?;

        Ok(EmbeddableFont { face, format })
    }

    pub fn format(&self) -> FontFormat {
        self.format
    }

    /// The untouched font file, as it will be written into the PDF.
    pub fn program(&self) -> &[u8] {
        self.face.as_slice()
    }

    pub fn units_per_em(&self) -> u16 {
        self.face.as_face_ref().units_per_em()
    }

    pub fn glyph_id(&self, ch: char) -> Option<u16> {
        self.face.as_face_ref().glyph_index(ch).map(|gid| gid.0)
    }

    /// Glyph used for characters the font does not map.
    pub fn fallback_glyph_id(&self) -> u16 {
        self.glyph_id('\u{FFFD}')
            .or_else(|| self.glyph_id('?'))
            .unwrap_or(0)
    }

    /// Horizontal advance in font units.
    pub fn advance_units(&self, glyph_id: u16) -> u16 {
        self.face
            .as_face_ref()
            .glyph_hor_advance(GlyphId(glyph_id))
            .unwrap_or_default()
    }

    /// Scale font units into the 1000-unit glyph space PDF widths use.
    pub fn to_pdf_units(&self, units: i32) -> i64 {
        (units as i64 * 1000) / self.units_per_em().max(1) as i64
    }

    /// PostScript name suitable for a PDF `/BaseFont` name.
    pub fn postscript_name(&self) -> String {
        let raw = face_name(
            self.face.as_face_ref(),
            &[name_id::POST_SCRIPT_NAME, name_id::FULL_NAME],
        )
        .unwrap_or_default();

        let mut out = String::with_capacity(raw.len());
        for ch in raw.chars() {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                out.push(ch);
            } else if ch.is_whitespace() {
                out.push('-');
            }
        }
        if out.is_empty() {
            "InkScribeHand".to_string()
        } else {
            out
        }
    }

    /// Every glyph reachable from a Unicode cmap subtable, with the first
    /// character that maps to it.
    pub fn glyph_map(&self) -> BTreeMap<u16, char> {
        let mut map: BTreeMap<u16, char> = BTreeMap::new();
        let Some(cmap) = self.face.as_face_ref().tables().cmap else {
            return map;
        };

        for subtable in cmap
            .subtables
            .into_iter()
            .filter(|table| table.is_unicode())
        {
            subtable.codepoints(|codepoint: u32| {
                if let Ok(ch) = char::try_from(codepoint) {
                    if let Some(index) = subtable.glyph_index(codepoint).filter(|index| index.0 > 0)
                    {
                        map.entry(index.0).or_insert(ch);
                    }
                }
            });
        }

        map
    }

    /// Values for the PDF font descriptor, in 1000-unit glyph space.
    pub fn descriptor_metrics(&self) -> DescriptorMetrics {
        let face = self.face.as_face_ref();
        let bbox = face.global_bounding_box();
        let mut flags = 32; // nonsymbolic
        if face.is_monospaced() {
            flags |= 1;
        }
        if face.is_italic() {
            flags |= 64;
        }

        DescriptorMetrics {
            bbox: [
                self.to_pdf_units(bbox.x_min as i32),
                self.to_pdf_units(bbox.y_min as i32),
                self.to_pdf_units(bbox.x_max as i32),
                self.to_pdf_units(bbox.y_max as i32),
            ],
            ascent: self.to_pdf_units(face.ascender() as i32),
            descent: self.to_pdf_units(face.descender() as i32),
            cap_height: self.to_pdf_units(
                face.capital_height().unwrap_or_else(|| face.ascender()) as i32,
            ),
            flags,
        }
    }
}

impl GlyphMeasure for EmbeddableFont {
    fn advance(&self, ch: char, font_size: f32) -> f32 {
        let glyph_id = self.glyph_id(ch).unwrap_or_else(|| self.fallback_glyph_id());
        self.advance_units(glyph_id) as f32 * font_size / self.units_per_em().max(1) as f32
    }

    fn has_glyph(&self, ch: char) -> bool {
        self.glyph_id(ch).is_some_and(|gid| gid != 0)
    }
}

/// Font descriptor numbers, already scaled to 1000 units per em.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMetrics {
    pub bbox: [i64; 4],
    pub ascent: i64,
    pub descent: i64,
    pub cap_height: i64,
    pub flags: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_header_is_rejected() {
        let error = validate(&[0x00, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(error, InkError::InvalidFontFormat));
    }

    #[test]
    fn otto_header_is_opentype() {
        assert_eq!(
            validate(&[0x4f, 0x54, 0x54, 0x4f]).expect("accepted"),
            FontFormat::Otf
        );
    }

    #[test]
    fn truetype_header_is_truetype() {
        assert_eq!(
            validate(&[0x00, 0x01, 0x00, 0x00, 0xff]).expect("accepted"),
            FontFormat::Ttf
        );
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(matches!(
            validate(&[0x00, 0x01]),
            Err(InkError::InvalidFontFormat)
        ));
        assert!(matches!(validate(&[]), Err(InkError::InvalidFontFormat)));
    }

    #[test]
    fn oversized_fonts_are_rejected_before_the_magic_check() {
        let mut bytes = vec![0u8; MAX_FONT_BYTES + 1];
        bytes[..4].copy_from_slice(&TRUETYPE_MAGIC);
        assert!(matches!(
            validate(&bytes),
            Err(InkError::FontTooLarge { .. })
        ));
    }

    struct Fixed(f32);

    impl GlyphMeasure for Fixed {
        fn advance(&self, _ch: char, font_size: f32) -> f32 {
            self.0 * font_size
        }

        fn has_glyph(&self, ch: char) -> bool {
            ch == 'A'
        }
    }

    #[test]
    fn smoke_test_uses_the_first_mapped_character() {
        assert_eq!(smoke_test(&Fixed(0.5), 12.0).expect("passes"), 'A');
    }

    #[test]
    fn smoke_test_rejects_zero_width_glyphs() {
        assert!(matches!(
            smoke_test(&Fixed(0.0), 12.0),
            Err(InkError::FontEmbedError(_))
        ));
    }
}
