//! Line wrapping and placement on the ruled grid
//!
//! This is the one layout implementation both renderers call. The preview
//! draws the result on screen, the compositor burns the identical result into
//! the PDF, and the overflow controller carries the spill to the next page.
//!
//! Width is estimated, not measured: a line holds
//! `floor(available_width / (font_size * WIDTH_FACTOR))` characters. Handwriting
//! fonts vary per glyph, so this is an approximation of the average advance.
//! It stays an approximation on purpose. Switching only one renderer to true
//! glyph widths would make previewed and exported line breaks disagree, so
//! any upgrade has to change [`max_chars_per_line`] for both at once.

use unicode_segmentation::UnicodeSegmentation;

use crate::error::InkError;
use crate::fonts::GlyphMeasure;
use crate::overflow::OverflowRecord;
use crate::palette::InkColor;
use crate::settings::{PageContent, PageGeometry, TextStyle};

/// Average glyph advance as a fraction of the font size.
pub const WIDTH_FACTOR: f32 = 0.6;

/// Space kept free at the bottom of every page, in points.
pub const BOTTOM_RESERVE: f32 = 80.0;

/// Distance from the top of a line box to the glyph baseline, as a fraction of the font size.
pub const BASELINE_FACTOR: f32 = 0.8;

/// Faux-bold growth per 100 weight units above regular, as a fraction of the font size.
const EMBOLDEN_PER_100: f32 = 0.008;

/// Lines of a page split at its line budget.
#[derive(Debug, Clone, PartialEq)]
pub struct WrapResult {
    /// Lines that fit on the page
    pub lines: Vec<String>,
    /// Lines past the page's budget, in order
    pub overflow_lines: Vec<String>,
    pub max_chars_per_line: usize,
    pub max_lines_for_page: usize,
    /// Set when the geometry left no usable width and layout fell back to
    /// one character per line.
    pub degenerate: bool,
}

impl WrapResult {
    pub fn total_line_count(&self) -> usize {
        self.lines.len() + self.overflow_lines.len()
    }
}

/// How many characters fit on one line.
///
/// Fails with [`InkError::LayoutDegenerate`] when there is no positive width
/// to fill; [`wrap`] recovers from that by using one character per line.
pub fn max_chars_per_line(geometry: &PageGeometry, style: &TextStyle) -> Result<usize, InkError> {
    let available_width = geometry.available_width();
    let char_width = style.font_size * WIDTH_FACTOR;

    if !(available_width > 0.0) || !(char_width > 0.0) {
        return Err(InkError::LayoutDegenerate { available_width });
    }

    Ok(((available_width / char_width).floor() as usize).max(1))
}

/// How many ruled lines a page offers. Always at least one.
pub fn max_lines_for_page(geometry: &PageGeometry) -> usize {
    let usable_height = geometry.page_height - geometry.margin_top - BOTTOM_RESERVE;
    if !(geometry.line_spacing > 0.0) {
        log::warn!(
            "Line spacing {} is not positive, allowing a single line",
            geometry.line_spacing
        );
        return 1;
    }

    let lines = (usable_height / geometry.line_spacing).floor();
    if lines >= 1.0 {
        lines as usize
    } else {
        1
    }
}

/// Top-down y coordinate of the baseline of line `index`. Depends on nothing
/// but the index, the geometry and the font size.
pub fn y_position(index: usize, geometry: &PageGeometry, style: &TextStyle) -> f32 {
    geometry.margin_top + index as f32 * geometry.line_spacing + style.font_size * BASELINE_FACTOR
}

/// Wrap `text` onto a page and split off what does not fit.
pub fn wrap(text: &str, geometry: &PageGeometry, style: &TextStyle) -> WrapResult {
    let (max_chars, degenerate) = match max_chars_per_line(geometry, style) {
        Ok(max_chars) => (max_chars, false),
        Err(error) => {
            log::warn!("{}, breaking after every character", error);
            (1, true)
        }
    };

    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<String> = Vec::new();
    for paragraph in normalized.split('\n') {
        lines.extend(wrap_paragraph(paragraph, max_chars));
    }

    let max_lines = max_lines_for_page(geometry);
    let overflow_lines = if lines.len() > max_lines {
        lines.split_off(max_lines)
    } else {
        Vec::new()
    };

    log::debug!(
        "Wrapped {} lines ({} overflowing) at {} chars per line",
        lines.len() + overflow_lines.len(),
        overflow_lines.len(),
        max_chars
    );

    WrapResult {
        lines,
        overflow_lines,
        max_chars_per_line: max_chars,
        max_lines_for_page: max_lines,
        degenerate,
    }
}

/// A run of either whitespace or non-whitespace. Whitespace is kept as its
/// own token so exact spacing survives inside a line.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TextToken<'a> {
    Word(&'a str),
    Space(&'a str),
}

impl<'a> TextToken<'a> {
    fn text(&self) -> &'a str {
        match self {
            TextToken::Word(text) | TextToken::Space(text) => text,
        }
    }
}

fn tokenize(paragraph: &str) -> Vec<TextToken<'_>> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_space: Option<bool> = None;

    for (index, ch) in paragraph.char_indices() {
        let is_space = ch.is_whitespace();
        match in_space {
            Some(previous) if previous != is_space => {
                tokens.push(make_token(&paragraph[start..index], previous));
                start = index;
            }
            _ => {}
        }
        in_space = Some(is_space);
    }

    if let Some(previous) = in_space {
        tokens.push(make_token(&paragraph[start..], previous));
    }

    tokens
}

fn make_token(text: &str, is_space: bool) -> TextToken<'_> {
    if is_space {
        TextToken::Space(text)
    } else {
        TextToken::Word(text)
    }
}

fn grapheme_len(text: &str) -> usize {
    text.graphemes(true).count()
}

/// Split `text` after `count` graphemes.
fn split_graphemes(text: &str, count: usize) -> (&str, &str) {
    match text.grapheme_indices(true).nth(count) {
        Some((byte_index, _)) => text.split_at(byte_index),
        None => (text, ""),
    }
}

/// Greedily pack one paragraph (no `\n` inside) into lines of at most
/// `max_chars` graphemes. An empty paragraph yields one empty line.
pub fn wrap_paragraph(paragraph: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if paragraph.is_empty() {
        return vec![String::new()];
    }

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for token in tokenize(paragraph) {
        let token_len = grapheme_len(token.text());

        if current_len + token_len <= max_chars {
            current.push_str(token.text());
            current_len += token_len;
            continue;
        }

        let flushed = current.trim_end();
        if !flushed.is_empty() {
            lines.push(flushed.to_string());
        }

        current = token.text().trim_start().to_string();
        current_len = grapheme_len(&current);

        // A single unbroken run longer than a line is cut at grapheme boundaries
        while current_len > max_chars {
            let (head, tail) = split_graphemes(&current, max_chars);
            lines.push(head.to_string());
            current = tail.to_string();
            current_len -= max_chars;
        }
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }

    lines
}

/// One derived line of a page, ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct WrappedLine {
    pub index: usize,
    pub text: String,
    pub y_position: f32,
    pub color: InkColor,
}

/// The in-budget lines of a page plus whatever spilled over.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub lines: Vec<WrappedLine>,
    pub overflow: Option<OverflowRecord>,
    pub degenerate: bool,
}

impl PageLayout {
    pub fn overflow_lines(&self) -> &[String] {
        self.overflow
            .as_ref()
            .map(|record| record.overflow_lines.as_slice())
            .unwrap_or(&[])
    }
}

/// Lay out a page from its persisted content.
pub fn layout_page(page: &PageContent) -> PageLayout {
    layout_with(page, &page.geometry)
}

/// Lay out a page's content against a specific geometry, e.g. with the real
/// page size substituted by the compositor.
pub fn layout_with(page: &PageContent, geometry: &PageGeometry) -> PageLayout {
    let wrapped = wrap(&page.raw_text, geometry, &page.style);
    let total_line_count = wrapped.total_line_count();

    let overflow = if wrapped.overflow_lines.is_empty() {
        None
    } else {
        Some(OverflowRecord {
            source_page_number: page.page_number,
            overflow_lines: wrapped.overflow_lines,
            total_line_count,
        })
    };

    let lines = wrapped
        .lines
        .into_iter()
        .enumerate()
        .map(|(index, text)| WrappedLine {
            index,
            text,
            y_position: y_position(index, geometry, &page.style),
            color: page.line_color(index),
        })
        .collect();

    PageLayout {
        lines,
        overflow,
        degenerate: wrapped.degenerate,
    }
}

/// A glyph with its pen position on the line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedGlyph {
    pub ch: char,
    /// Left edge, in points from the page's left edge
    pub x: f32,
    pub advance: f32,
}

/// Position every character of `text` starting at `x`. The pen moves by the
/// measured advance plus the style's letter spacing after each glyph. Both
/// renderers draw through this, one glyph at a time.
pub fn place_glyphs<M: GlyphMeasure + ?Sized>(
    text: &str,
    x: f32,
    measure: &M,
    style: &TextStyle,
) -> Vec<PlacedGlyph> {
    let mut pen = x;
    text.chars()
        .map(|ch| {
            let advance = measure.advance(ch, style.font_size);
            let glyph = PlacedGlyph { ch, x: pen, advance };
            pen += advance + style.letter_spacing;
            glyph
        })
        .collect()
}

/// How far strokes are thickened to simulate weights above regular, in points.
pub fn embolden_offset(style: &TextStyle) -> f32 {
    if style.font_weight <= 400 {
        return 0.0;
    }
    (style.font_weight - 400) as f32 / 100.0 * EMBOLDEN_PER_100 * style.font_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words(max_chars: usize, text: &str) -> Vec<String> {
        wrap_paragraph(text, max_chars)
    }

    #[test]
    fn tokens_alternate_between_words_and_spaces() {
        assert_eq!(
            tokenize("ab  c\td"),
            vec![
                TextToken::Word("ab"),
                TextToken::Space("  "),
                TextToken::Word("c"),
                TextToken::Space("\t"),
                TextToken::Word("d"),
            ]
        );
    }

    #[test]
    fn greedy_packing_trims_at_wrap_points() {
        assert_eq!(
            words(10, "the quick brown fox jumps"),
            vec!["the quick", "brown fox", "jumps"]
        );
    }

    #[test]
    fn inner_spacing_is_preserved() {
        assert_eq!(words(20, "a    b"), vec!["a    b"]);
    }

    #[test]
    fn long_tokens_are_hard_broken() {
        assert_eq!(
            words(4, "ab abcdefghij k"),
            vec!["ab", "abcd", "efgh", "ij k"]
        );
    }

    #[test]
    fn hard_breaks_respect_graphemes() {
        // e + combining acute stays one character
        let text = "e\u{301}e\u{301}e\u{301}";
        let lines = words(2, text);
        assert_eq!(lines, vec!["e\u{301}e\u{301}", "e\u{301}"]);
    }

    #[test]
    fn trailing_space_at_a_wrap_point_does_not_add_a_line() {
        assert_eq!(words(5, "hello "), vec!["hello"]);
    }

    #[test]
    fn empty_input_is_one_empty_line() {
        let result = wrap("", &PageGeometry::default(), &TextStyle::default());
        assert_eq!(result.lines, vec![String::new()]);
        assert!(result.overflow_lines.is_empty());
    }

    #[test]
    fn manual_blank_lines_survive() {
        let result = wrap("one\n\n\nfour", &PageGeometry::default(), &TextStyle::default());
        assert_eq!(result.lines, vec!["one", "", "", "four"]);
    }

    #[test]
    fn carriage_returns_are_normalized() {
        let result = wrap("one\r\ntwo\rthree", &PageGeometry::default(), &TextStyle::default());
        assert_eq!(result.lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn default_a4_budget() {
        let geometry = PageGeometry::default();
        // (842 - 93 - 80) / 24.6 = 27.19
        assert_eq!(max_lines_for_page(&geometry), 27);
        // (595 - 80) / 14.4 = 35.76
        assert_eq!(
            max_chars_per_line(&geometry, &TextStyle::default()).expect("not degenerate"),
            35
        );
    }

    #[test]
    fn negative_width_degenerates_to_one_character_per_line() {
        let geometry = PageGeometry {
            margin_left: 400.0,
            margin_right: 300.0,
            ..PageGeometry::default()
        };
        assert!(matches!(
            max_chars_per_line(&geometry, &TextStyle::default()),
            Err(InkError::LayoutDegenerate { .. })
        ));

        let result = wrap("abc", &geometry, &TextStyle::default());
        assert!(result.degenerate);
        assert_eq!(result.lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn zero_line_spacing_still_offers_one_line() {
        let geometry = PageGeometry {
            line_spacing: 0.0,
            ..PageGeometry::default()
        };
        let result = wrap("a\nb", &geometry, &TextStyle::default());
        assert_eq!(result.lines, vec!["a"]);
        assert_eq!(result.overflow_lines, vec!["b"]);
    }

    #[test]
    fn baseline_grid() {
        let geometry = PageGeometry::default();
        let style = TextStyle::default();
        assert_eq!(y_position(0, &geometry, &style), 93.0 + 24.0 * 0.8);
        assert_eq!(
            y_position(2, &geometry, &style),
            93.0 + 2.0 * 24.6 + 24.0 * 0.8
        );
    }

    #[test]
    fn emboldening_only_applies_above_regular() {
        let regular = TextStyle::default();
        assert_eq!(embolden_offset(&regular), 0.0);
        let bold = TextStyle {
            font_weight: 700,
            ..TextStyle::default()
        };
        assert!((embolden_offset(&bold) - 3.0 * 0.008 * 24.0).abs() < 1e-6);
    }

    struct Monospace;

    impl GlyphMeasure for Monospace {
        fn advance(&self, _ch: char, font_size: f32) -> f32 {
            font_size / 2.0
        }

        fn has_glyph(&self, _ch: char) -> bool {
            true
        }
    }

    #[test]
    fn pen_advances_by_width_plus_letter_spacing() {
        let style = TextStyle {
            font_size: 10.0,
            letter_spacing: 1.5,
            ..TextStyle::default()
        };
        let glyphs = place_glyphs("abc", 40.0, &Monospace, &style);
        let xs: Vec<f32> = glyphs.iter().map(|glyph| glyph.x).collect();
        assert_eq!(xs, vec![40.0, 46.5, 53.0]);
    }

    #[test]
    fn line_colors_resolve_per_index() {
        let mut page = PageContent::new(1, PageGeometry::default(), TextStyle::default())
            .with_text("first\nsecond");
        page.line_colors.insert(1, InkColor::Red);
        let layout = layout_page(&page);
        assert_eq!(layout.lines[0].color, InkColor::Blue);
        assert_eq!(layout.lines[1].color, InkColor::Red);
    }
}
