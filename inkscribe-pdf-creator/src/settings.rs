//! Page geometry, text style and per-page content
//!
//! All lengths are typographic points in the PDF page's own unit space, with
//! the y axis growing downwards from the top edge of the page.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{InkError, Result};
use crate::palette::InkColor;

/// Where the ruled lines of a page sit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageGeometry {
    pub line_box_height: f32,
    pub line_spacing: f32,
    pub margin_left: f32,
    pub margin_right: f32,
    pub margin_top: f32,
    pub page_width: f32,
    pub page_height: f32,
}

impl Default for PageGeometry {
    fn default() -> Self {
        // A4 ruled sheet
        PageGeometry {
            line_box_height: 24.6,
            line_spacing: 24.6,
            margin_left: 40.0,
            margin_right: 40.0,
            margin_top: 93.0,
            page_width: 595.0,
            page_height: 842.0,
        }
    }
}

impl PageGeometry {
    /// Width left for text between the side margins. May be zero or negative
    /// for nonsensical margins, which layout treats as degenerate.
    pub fn available_width(&self) -> f32 {
        self.page_width - self.margin_left - self.margin_right
    }

    /// The same ruling applied to a page of a different size.
    pub fn with_page_size(&self, page_width: f32, page_height: f32) -> PageGeometry {
        PageGeometry {
            page_width,
            page_height,
            ..*self
        }
    }

    pub fn is_finite(&self) -> bool {
        [
            self.line_box_height,
            self.line_spacing,
            self.margin_left,
            self.margin_right,
            self.margin_top,
            self.page_width,
            self.page_height,
        ]
        .iter()
        .all(|value| value.is_finite())
    }
}

/// How the handwriting is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextStyle {
    pub font_size: f32,
    /// CSS-style weight; anything above 400 is emboldened by both renderers.
    pub font_weight: u16,
    /// Extra advance after every glyph, in points.
    pub letter_spacing: f32,
    pub color: InkColor,
}

impl Default for TextStyle {
    fn default() -> Self {
        TextStyle {
            font_size: 24.0,
            font_weight: 400,
            letter_spacing: 0.0,
            color: InkColor::default(),
        }
    }
}

impl TextStyle {
    pub fn is_finite(&self) -> bool {
        self.font_size.is_finite() && self.letter_spacing.is_finite()
    }
}

/// Everything that is persisted for one page. `raw_text` is the single source
/// of truth; wrapped lines are always derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    /// 1-based, contiguous across a document
    pub page_number: u32,
    pub raw_text: String,
    /// Sparse per-line ink overrides keyed by wrapped line index.
    #[serde(default)]
    pub line_colors: BTreeMap<usize, InkColor>,
    #[serde(default)]
    pub geometry: PageGeometry,
    #[serde(default)]
    pub style: TextStyle,
}

impl PageContent {
    pub fn new(page_number: u32, geometry: PageGeometry, style: TextStyle) -> Self {
        PageContent {
            page_number,
            raw_text: String::new(),
            line_colors: BTreeMap::new(),
            geometry,
            style,
        }
    }

    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.raw_text = text.into();
        self
    }

    /// `line_colors[index]`, falling back to the page ink.
    pub fn line_color(&self, index: usize) -> InkColor {
        self.line_colors
            .get(&index)
            .copied()
            .unwrap_or(self.style.color)
    }

    /// Advance line `index` to the next ink in the palette and return it.
    pub fn cycle_line_color(&mut self, index: usize) -> InkColor {
        let next = self.line_color(index).next();
        self.line_colors.insert(index, next);
        next
    }
}

/// Checks that `pages` are numbered 1, 2, 3, ... in order.
pub fn check_page_numbering(pages: &[PageContent]) -> Result<()> {
    for (position, page) in pages.iter().enumerate() {
        if page.page_number as usize != position + 1 {
            return Err(InkError::PageNumbering {
                position,
                found: page.page_number,
            });
        }
    }
    Ok(())
}

/// Editor-wide defaults, usually read from a JSON file next to the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditorSettings {
    pub geometry: PageGeometry,
    pub style: TextStyle,
    /// Delay between the last edit and persisting it.
    pub debounce_ms: u64,
}

impl Default for EditorSettings {
    fn default() -> Self {
        EditorSettings {
            geometry: PageGeometry::default(),
            style: TextStyle::default(),
            debounce_ms: 2000,
        }
    }
}

impl EditorSettings {
    pub fn from_path<P: AsRef<Path>>(settings_path: P) -> Result<Self> {
        let settings_path = settings_path.as_ref();
        let contents = std::fs::read_to_string(settings_path).map_err(|error| {
            InkError::Config(format!(
                "unable to read the settings file {:?}: {}",
                settings_path, error
            ))
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|error| InkError::Config(format!("unable to parse the settings: {}", error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fill_in_defaults() {
        let settings =
            EditorSettings::from_json(r#"{ "style": { "fontSize": 18, "color": "red" } }"#)
                .expect("settings parse");
        assert_eq!(settings.style.font_size, 18.0);
        assert_eq!(settings.style.color, InkColor::Red);
        assert_eq!(settings.style.font_weight, 400);
        assert_eq!(settings.geometry, PageGeometry::default());
        assert_eq!(settings.debounce_ms, 2000);
    }

    #[test]
    fn settings_carry_only_layout_and_persistence_keys() {
        let value = serde_json::to_value(EditorSettings::default()).expect("serialises");
        let mut keys: Vec<&str> = value
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["debounceMs", "geometry", "style"]);
    }

    #[test]
    fn malformed_settings_are_a_config_error() {
        let error = EditorSettings::from_json("{ nope").unwrap_err();
        assert!(matches!(error, InkError::Config(_)));
    }

    #[test]
    fn line_colors_fall_back_to_page_ink() {
        let mut page = PageContent::new(1, PageGeometry::default(), TextStyle::default());
        page.line_colors.insert(2, InkColor::Green);
        assert_eq!(page.line_color(2), InkColor::Green);
        assert_eq!(page.line_color(0), InkColor::Blue);
    }

    #[test]
    fn page_numbers_must_be_contiguous() {
        let pages = vec![
            PageContent::new(1, PageGeometry::default(), TextStyle::default()),
            PageContent::new(3, PageGeometry::default(), TextStyle::default()),
        ];
        let error = check_page_numbering(&pages).unwrap_err();
        assert!(matches!(
            error,
            InkError::PageNumbering {
                position: 1,
                found: 3
            }
        ));
    }

    #[test]
    fn page_content_round_trips_through_json() {
        let mut page = PageContent::new(4, PageGeometry::default(), TextStyle::default())
            .with_text("line one\nline two");
        page.line_colors.insert(1, InkColor::Teal);
        let json = serde_json::to_string(&page).expect("serialises");
        let back: PageContent = serde_json::from_str(&json).expect("deserialises");
        assert_eq!(back, page);
    }
}
