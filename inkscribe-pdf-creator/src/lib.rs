//! InkScribe PDF Creator
//!
//! Lays typed text out on the ruled lines of an existing PDF and renders it in
//! a handwriting font, both as a live preview and burned into the PDF itself.
//! Text that does not fit a page flows onto the following pages until the
//! user has visited them.
//!
//! Both renderers share [`typography`], so a preview and its export always
//! break lines in the same places.

pub mod compositor;
pub mod error;
pub mod export;
pub mod fonts;
pub mod overflow;
pub mod palette;
pub mod preview;
pub mod project;
pub mod settings;
pub mod storage;
pub mod typography;

pub use compositor::{compose_pdf, page_sizes, Compositor, MediaBox};
pub use error::{InkError, Result};
pub use export::{ExportGuard, ExportService};
pub use fonts::{validate, EmbeddableFont, FontFormat, FontRecord, RenderableFont};
pub use overflow::{EditSession, OverflowController, OverflowRecord, PairState, VisitedSet};
pub use palette::InkColor;
pub use preview::{PageImage, PreviewRenderer};
pub use project::{Project, ProjectSnapshot};
pub use settings::{EditorSettings, PageContent, PageGeometry, TextStyle};
pub use storage::{FileFetcher, JsonDirStore, MemoryStore, ProjectStore, SourceFetch};
pub use typography::{layout_page, wrap, WrapResult, WrappedLine};

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

unsafe fn c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

fn compose_files(
    source_pdf_path: &str,
    font_path: &str,
    pages_json: &str,
    output_path: &str,
) -> Result<()> {
    let pages: Vec<PageContent> = serde_json::from_str(pages_json)
        .map_err(|error| InkError::Config(format!("unable to parse the pages: {}", error)))?;
    settings::check_page_numbering(&pages)?;

    let source_pdf = std::fs::read(source_pdf_path)?;
    let font = EmbeddableFont::from_bytes(std::fs::read(font_path)?)?;
    let output = compose_pdf(&source_pdf, font, &pages)?;
    std::fs::write(output_path, output)?;
    Ok(())
}

/// Composite pages given as a JSON array of page contents onto a PDF on disk.
///
/// Returns 0 on success, -1 on failure, -2 if an argument is null.
#[no_mangle]
pub extern "C" fn inkscribe_compose_pdf(
    source_pdf_path: *const c_char,
    font_path: *const c_char,
    pages_json: *const c_char,
    output_path: *const c_char,
) -> c_int {
    // Safety: the caller passes NUL-terminated strings or null
    let arguments = unsafe {
        (
            c_str(source_pdf_path),
            c_str(font_path),
            c_str(pages_json),
            c_str(output_path),
        )
    };
    let (Some(source_pdf_path), Some(font_path), Some(pages_json), Some(output_path)) = arguments
    else {
        return -2;
    };

    match compose_files(&source_pdf_path, &font_path, &pages_json, &output_path) {
        Ok(()) => 0,
        Err(error) => {
            log::error!("PDF composition failed: {}", error);
            -1
        }
    }
}
