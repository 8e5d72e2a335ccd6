//! Export boundary
//!
//! `generate` turns a stored project into PDF bytes. Only one export per
//! project may run at a time; a second request while one is in flight is
//! rejected rather than queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::compositor::Compositor;
use crate::error::{InkError, Result};
use crate::fonts::EmbeddableFont;
use crate::storage::{fetch_with_retry, ProjectStore, SourceFetch};

/// Projects with an export running.
#[derive(Debug, Clone, Default)]
pub struct ExportGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ExportGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the export slot of `project_id`. The slot is released when the
    /// returned ticket drops, whether the export succeeded or not.
    pub fn acquire(&self, project_id: &str) -> Result<ExportTicket> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| InkError::Storage("export guard lock poisoned".into()))?;
        if !in_flight.insert(project_id.to_string()) {
            return Err(InkError::ExportInFlight(project_id.to_string()));
        }
        Ok(ExportTicket {
            guard: self.clone(),
            project_id: project_id.to_string(),
        })
    }

    pub fn is_in_flight(&self, project_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.contains(project_id))
            .unwrap_or(false)
    }
}

/// Held for the duration of one export.
#[derive(Debug)]
pub struct ExportTicket {
    guard: ExportGuard,
    project_id: String,
}

impl ExportTicket {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

impl Drop for ExportTicket {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.guard.in_flight.lock() {
            in_flight.remove(&self.project_id);
        }
    }
}

/// Loads projects, fetches their sources and composites them.
pub struct ExportService<F, S> {
    fetcher: F,
    store: S,
    guard: ExportGuard,
}

impl<F, S> ExportService<F, S>
where
    F: SourceFetch,
    S: ProjectStore,
{
    pub fn new(fetcher: F, store: S) -> Self {
        ExportService {
            fetcher,
            store,
            guard: ExportGuard::new(),
        }
    }

    /// Share an existing guard, e.g. one per process across short-lived services.
    pub fn with_guard(fetcher: F, store: S, guard: ExportGuard) -> Self {
        ExportService {
            fetcher,
            store,
            guard,
        }
    }

    pub fn guard(&self) -> &ExportGuard {
        &self.guard
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Produce the finished PDF of `project_id`.
    ///
    /// `font_override_url` replaces the project's font for this export only.
    pub fn generate(&self, project_id: &str, font_override_url: Option<&str>) -> Result<Vec<u8>> {
        let _ticket = self.guard.acquire(project_id)?;
        log::info!("Exporting project {}", project_id);

        let project = self.store.load_project(project_id)?;
        let source_pdf = fetch_with_retry(&self.fetcher, &project.source_pdf_url)?;

        let font_bytes = match font_override_url {
            Some(url) => {
                log::info!("Using font override {} for {}", url, project_id);
                fetch_with_retry(&self.fetcher, url)?
            }
            None => project.font.resolve_bytes(&self.fetcher)?,
        };
        let font = EmbeddableFont::from_bytes(font_bytes)?;

        let output = Compositor::new(&source_pdf, font)?.compose(&project.pages)?;
        log::info!(
            "Exported project {} ({} pages, {} bytes)",
            project_id,
            project.pages.len(),
            output.len()
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_second_ticket_for_the_same_project_is_refused() {
        let guard = ExportGuard::new();
        let ticket = guard.acquire("doc").expect("first export");
        assert!(matches!(
            guard.acquire("doc"),
            Err(InkError::ExportInFlight(ref id)) if id == "doc"
        ));
        assert!(guard.acquire("other").is_ok());
        assert_eq!(ticket.project_id(), "doc");
    }

    #[test]
    fn dropping_the_ticket_frees_the_slot() {
        let guard = ExportGuard::new();
        {
            let _ticket = guard.acquire("doc").expect("first export");
            assert!(guard.is_in_flight("doc"));
        }
        assert!(!guard.is_in_flight("doc"));
        assert!(guard.acquire("doc").is_ok());
    }
}
