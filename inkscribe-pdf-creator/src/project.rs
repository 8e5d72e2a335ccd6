//! Project controller
//!
//! Owns the pages of one document together with the editing session, runs
//! the overflow controller after every edit and hands dirty pages to a
//! [`ProjectStore`] once the debounce window has passed.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::compositor::MediaBox;
use crate::error::{InkError, Result};
use crate::fonts::FontRecord;
use crate::overflow::{EditSession, OverflowController, OverflowRecord};
use crate::palette::InkColor;
use crate::settings::{check_page_numbering, EditorSettings, PageContent, TextStyle};
use crate::storage::{ProjectStore, SaveDebouncer};
use crate::typography::layout_page;

/// The persisted form of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub id: String,
    pub font: FontRecord,
    /// Location of the PDF the handwriting is burned into
    pub source_pdf_url: String,
    pub pages: Vec<PageContent>,
}

pub struct Project {
    id: String,
    font: FontRecord,
    source_pdf_url: String,
    pages: Vec<PageContent>,
    session: EditSession,
    debouncer: SaveDebouncer,
}

impl Project {
    /// A project with one blank page per source page, each laid out with the
    /// editor defaults on a sheet of that page's size.
    pub fn new(
        id: impl Into<String>,
        font: FontRecord,
        source_pdf_url: impl Into<String>,
        page_sizes: &[MediaBox],
        settings: &EditorSettings,
    ) -> Self {
        let pages = (1..)
            .zip(page_sizes)
            .map(|(page_number, size)| {
                let geometry = settings.geometry.with_page_size(size.width, size.height);
                PageContent::new(page_number, geometry, settings.style)
            })
            .collect();

        Project {
            id: id.into(),
            font,
            source_pdf_url: source_pdf_url.into(),
            pages,
            session: EditSession::new(),
            debouncer: SaveDebouncer::new(Duration::from_millis(settings.debounce_ms)),
        }
    }

    pub fn from_snapshot(snapshot: ProjectSnapshot, settings: &EditorSettings) -> Result<Self> {
        check_page_numbering(&snapshot.pages)?;

        Ok(Project {
            id: snapshot.id,
            font: snapshot.font,
            source_pdf_url: snapshot.source_pdf_url,
            pages: snapshot.pages,
            session: EditSession::new(),
            debouncer: SaveDebouncer::new(Duration::from_millis(settings.debounce_ms)),
        })
    }

    /// Load a project from `store` and start a fresh editing session on it.
    pub fn open(store: &dyn ProjectStore, id: &str, settings: &EditorSettings) -> Result<Self> {
        let snapshot = store.load_project(id)?;
        log::info!(
            "Opened project {} with {} pages",
            snapshot.id,
            snapshot.pages.len()
        );
        Self::from_snapshot(snapshot, settings)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn font(&self) -> &FontRecord {
        &self.font
    }

    pub fn source_pdf_url(&self) -> &str {
        &self.source_pdf_url
    }

    pub fn pages(&self) -> &[PageContent] {
        &self.pages
    }

    pub fn session(&self) -> &EditSession {
        &self.session
    }

    pub fn page(&self, page_number: u32) -> Result<&PageContent> {
        self.index_of(page_number).map(|index| &self.pages[index])
    }

    /// Whether `page_number` has edits the store has not seen yet.
    pub fn is_dirty(&self, page_number: u32) -> bool {
        self.debouncer.is_pending(page_number)
    }

    fn index_of(&self, page_number: u32) -> Result<usize> {
        let index = (page_number as usize)
            .checked_sub(1)
            .filter(|&index| index < self.pages.len())
            .ok_or(InkError::PageNotFound(page_number))?;
        Ok(index)
    }

    pub fn navigate_to(&mut self, page_number: u32) -> Result<()> {
        self.index_of(page_number)?;
        self.session.navigate_to(page_number);
        Ok(())
    }

    /// Replace the text of a page. Editing a page counts as visiting it.
    /// Returns the pages the overflow was written into.
    pub fn edit_page(&mut self, page_number: u32, text: &str, now: Instant) -> Result<Vec<u32>> {
        let index = self.index_of(page_number)?;
        if self.session.current_page() != Some(page_number) {
            self.session.navigate_to(page_number);
        }

        self.pages[index].raw_text = text.to_string();
        self.debouncer.touch(page_number, now);

        let changed = self.propagate_from(index);
        for &page in &changed {
            self.debouncer.touch(page, now);
        }
        Ok(changed)
    }

    fn propagate_from(&mut self, index: usize) -> Vec<u32> {
        let page = &self.pages[index];
        let layout = layout_page(page);
        let record = layout
            .overflow
            .unwrap_or_else(|| OverflowRecord::resolved(page.page_number, layout.lines.len()));
        OverflowController::apply(&mut self.pages, &mut self.session, record)
    }

    pub fn cycle_line_color(&mut self, page_number: u32, line: usize, now: Instant) -> Result<InkColor> {
        let index = self.index_of(page_number)?;
        let ink = self.pages[index].cycle_line_color(line);
        self.debouncer.touch(page_number, now);
        Ok(ink)
    }

    /// Apply one style to every page, then let overflow settle again under
    /// the new metrics. Returns the number of pages patched.
    pub fn apply_global_style(&mut self, style: TextStyle, now: Instant) -> usize {
        for page in &mut self.pages {
            page.style = style;
            self.debouncer.touch(page.page_number, now);
        }

        for index in 0..self.pages.len() {
            for page in self.propagate_from(index) {
                self.debouncer.touch(page, now);
            }
        }

        log::info!(
            "Applied font size {} to all {} pages of {}",
            style.font_size,
            self.pages.len(),
            self.id
        );
        self.pages.len()
    }

    /// Size every page to the source page it will be printed on and let
    /// overflow settle under the new line budgets. Pages beyond the end of
    /// `page_sizes` keep their geometry. Returns the resized pages.
    pub fn fit_to_source(&mut self, page_sizes: &[MediaBox], now: Instant) -> Vec<u32> {
        let mut resized = Vec::new();
        for (page, size) in self.pages.iter_mut().zip(page_sizes) {
            let geometry = page.geometry.with_page_size(size.width, size.height);
            if geometry != page.geometry {
                page.geometry = geometry;
                self.debouncer.touch(page.page_number, now);
                resized.push(page.page_number);
            }
        }
        if resized.is_empty() {
            return resized;
        }

        for index in 0..self.pages.len() {
            for page in self.propagate_from(index) {
                self.debouncer.touch(page, now);
            }
        }

        log::info!("Fitted {} pages of {} to the source PDF", resized.len(), self.id);
        resized
    }

    /// Persist pages whose last edit is older than the debounce delay.
    pub fn flush_due(&mut self, store: &dyn ProjectStore, now: Instant) -> Result<usize> {
        let due = self.debouncer.take_due(now);
        self.save_pages(store, due, now)
    }

    /// Persist every dirty page now, e.g. before export or shutdown.
    pub fn flush_all(&mut self, store: &dyn ProjectStore, now: Instant) -> Result<usize> {
        let all = self.debouncer.take_all();
        self.save_pages(store, all, now)
    }

    fn save_pages(&mut self, store: &dyn ProjectStore, pages: Vec<u32>, now: Instant) -> Result<usize> {
        for (position, &page_number) in pages.iter().enumerate() {
            let index = self.index_of(page_number)?;
            if let Err(error) = store.save_page(&self.id, &self.pages[index]) {
                log::error!("Saving page {} of {} failed: {}", page_number, self.id, error);
                for &unsaved in &pages[position..] {
                    self.debouncer.touch(unsaved, now);
                }
                return Err(error);
            }
        }

        if !pages.is_empty() {
            log::debug!("Saved {} pages of {}", pages.len(), self.id);
        }
        Ok(pages.len())
    }

    /// Write the whole project and forget pending page saves.
    pub fn save(&mut self, store: &dyn ProjectStore) -> Result<()> {
        store.save_project(&self.snapshot())?;
        self.debouncer.take_all();
        Ok(())
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            id: self.id.clone(),
            font: self.font.clone(),
            source_pdf_url: self.source_pdf_url.clone(),
            pages: self.pages.clone(),
        }
    }
}
