//! Error taxonomy shared by the preview and export paths.
//!
//! Export-path errors abort the whole document. Preview-path errors are logged
//! and the last good layout stays on screen, so nothing in the preview module
//! propagates these upward except construction failures.

use thiserror::Error;

/// Everything the creator can fail with.
#[derive(Error, Debug)]
pub enum InkError {
    /// The first four bytes are neither `00 01 00 00` (TrueType) nor `OTTO` (OpenType CFF).
    #[error("invalid font format: expected a TrueType or OpenType font")]
    InvalidFontFormat,

    /// The font exceeds the upload ceiling.
    #[error("font is {size} bytes, larger than the {limit} byte limit")]
    FontTooLarge { size: usize, limit: usize },

    /// The font parsed but cannot be embedded or measured; the user should re-upload it.
    #[error("font could not be embedded: {0}")]
    FontEmbedError(String),

    /// The usable line width is zero or negative. Layout recovers from this locally.
    #[error("layout has no usable width ({available_width}pt)")]
    LayoutDegenerate { available_width: f32 },

    /// An export for the same project is already running.
    #[error("an export is already running for project {0:?}")]
    ExportInFlight(String),

    /// Fetching a font or source PDF failed after the automatic retry.
    #[error("failed to fetch {url}: {reason}")]
    SourceFetch { url: String, reason: String },

    /// The source PDF could not be parsed or navigated.
    #[error("failed to read the source PDF: {0}")]
    PdfRead(String),

    /// The page was laid out for a different sheet than the one it is printed on,
    /// and its lines break differently there.
    #[error(
        "page {page_number} was laid out for {laid_out:?}pt but the source page is {actual:?}pt"
    )]
    PageSizeMismatch {
        page_number: u32,
        laid_out: (f32, f32),
        actual: (f32, f32),
    },

    /// The composed PDF could not be serialised.
    #[error("failed to write the PDF: {0}")]
    PdfWrite(String),

    /// Page numbers are not 1-based and contiguous.
    #[error("page numbers must be contiguous from 1, found {found} at position {position}")]
    PageNumbering { position: usize, found: u32 },

    #[error("page {0} does not exist")]
    PageNotFound(u32),

    #[error("project {0:?} does not exist")]
    ProjectNotFound(String),

    /// The persistence collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Settings could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<lopdf::Error> for InkError {
    fn from(error: lopdf::Error) -> Self {
        InkError::PdfRead(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InkError>;
