//! Collaborators at the edge of the creator: fetching font and PDF bytes,
//! persisting projects, and debouncing saves.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{InkError, Result};
use crate::project::ProjectSnapshot;
use crate::settings::PageContent;

/// Retrieves raw bytes for a font or source PDF.
pub trait SourceFetch: Send + Sync {
    fn fetch_bytes(&self, url: &str) -> std::io::Result<Vec<u8>>;
}

/// Fetch `url`, retrying once before reporting [`InkError::SourceFetch`].
pub fn fetch_with_retry(fetcher: &dyn SourceFetch, url: &str) -> Result<Vec<u8>> {
    match fetcher.fetch_bytes(url) {
        Ok(bytes) => Ok(bytes),
        Err(first) => {
            log::warn!("Fetching {} failed ({}), retrying once", url, first);
            fetcher
                .fetch_bytes(url)
                .map_err(|error| InkError::SourceFetch {
                    url: url.to_string(),
                    reason: error.to_string(),
                })
        }
    }
}

/// Resolves plain paths and `file://` URLs against a root directory.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        FileFetcher { root: root.into() }
    }

    fn resolve(&self, url: &str) -> PathBuf {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl SourceFetch for FileFetcher {
    fn fetch_bytes(&self, url: &str) -> std::io::Result<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "remote URLs need a network fetcher",
            ));
        }
        std::fs::read(self.resolve(url))
    }
}

/// Persistence of projects and individual pages.
pub trait ProjectStore: Send + Sync {
    fn save_page(&self, project_id: &str, page: &PageContent) -> Result<()>;

    fn save_project(&self, snapshot: &ProjectSnapshot) -> Result<()>;

    fn load_project(&self, project_id: &str) -> Result<ProjectSnapshot>;
}

fn upsert_page(snapshot: &mut ProjectSnapshot, page: &PageContent) -> Result<()> {
    let index = page.page_number as usize;
    let len = snapshot.pages.len();
    match snapshot.pages.get_mut(index.wrapping_sub(1)) {
        Some(slot) => *slot = page.clone(),
        None if index == len + 1 => snapshot.pages.push(page.clone()),
        None => return Err(InkError::PageNotFound(page.page_number)),
    }
    Ok(())
}

/// Keeps projects in memory; used by tests and the preview-only tooling.
#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<String, ProjectSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ProjectSnapshot>>> {
        self.projects
            .lock()
            .map_err(|_| InkError::Storage("project store lock poisoned".into()))
    }
}

impl ProjectStore for MemoryStore {
    fn save_page(&self, project_id: &str, page: &PageContent) -> Result<()> {
        let mut projects = self.lock()?;
        let snapshot = projects
            .get_mut(project_id)
            .ok_or_else(|| InkError::ProjectNotFound(project_id.to_string()))?;
        upsert_page(snapshot, page)
    }

    fn save_project(&self, snapshot: &ProjectSnapshot) -> Result<()> {
        self.lock()?.insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    fn load_project(&self, project_id: &str) -> Result<ProjectSnapshot> {
        self.lock()?
            .get(project_id)
            .cloned()
            .ok_or_else(|| InkError::ProjectNotFound(project_id.to_string()))
    }
}

/// One pretty-printed JSON file per project inside a directory.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    directory: PathBuf,
}

impl JsonDirStore {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        JsonDirStore {
            directory: directory.into(),
        }
    }

    fn project_path(&self, project_id: &str) -> PathBuf {
        let file_name: String = project_id
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        self.directory.join(format!("{}.json", file_name))
    }
}

impl ProjectStore for JsonDirStore {
    fn save_page(&self, project_id: &str, page: &PageContent) -> Result<()> {
        let mut snapshot = self.load_project(project_id)?;
        upsert_page(&mut snapshot, page)?;
        self.save_project(&snapshot)
    }

    fn save_project(&self, snapshot: &ProjectSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        let contents = serde_json::to_string_pretty(snapshot)
            .map_err(|error| InkError::Storage(error.to_string()))?;
        std::fs::write(self.project_path(&snapshot.id), contents)?;
        Ok(())
    }

    fn load_project(&self, project_id: &str) -> Result<ProjectSnapshot> {
        let path = self.project_path(project_id);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(InkError::ProjectNotFound(project_id.to_string()))
            }
            Err(error) => return Err(error.into()),
        };
        serde_json::from_str(&contents).map_err(|error| {
            InkError::Storage(format!("unable to parse the project {:?}: {}", path, error))
        })
    }
}

/// Tracks which pages changed and when, so persistence trails the last
/// keystroke by a fixed delay while layout stays immediate.
#[derive(Debug, Clone)]
pub struct SaveDebouncer {
    delay: Duration,
    pending: BTreeMap<u32, Instant>,
}

impl SaveDebouncer {
    pub fn new(delay: Duration) -> Self {
        SaveDebouncer {
            delay,
            pending: BTreeMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record an edit to `page_number` at `now`, restarting its timer.
    pub fn touch(&mut self, page_number: u32, now: Instant) {
        self.pending.insert(page_number, now);
    }

    pub fn is_pending(&self, page_number: u32) -> bool {
        self.pending.contains_key(&page_number)
    }

    /// Pages quiet for at least the delay; they are no longer pending.
    pub fn take_due(&mut self, now: Instant) -> Vec<u32> {
        let due: Vec<u32> = self
            .pending
            .iter()
            .filter(|&(_, &changed)| now.saturating_duration_since(changed) >= self.delay)
            .map(|(&page, _)| page)
            .collect();
        for page in &due {
            self.pending.remove(page);
        }
        due
    }

    /// Every pending page regardless of age.
    pub fn take_all(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.pending).into_keys().collect()
    }
}

impl Default for SaveDebouncer {
    fn default() -> Self {
        SaveDebouncer::new(Duration::from_millis(2000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SourceFetch for Flaky {
        fn fetch_bytes(&self, _url: &str) -> std::io::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out",
                ))
            } else {
                Ok(vec![1, 2, 3])
            }
        }
    }

    #[test]
    fn a_single_failure_is_retried() {
        let fetcher = Flaky {
            failures_left: AtomicUsize::new(1),
            calls: AtomicUsize::new(0),
        };
        assert_eq!(
            fetch_with_retry(&fetcher, "font.ttf").expect("second try succeeds"),
            vec![1, 2, 3]
        );
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn a_second_failure_is_surfaced() {
        let fetcher = Flaky {
            failures_left: AtomicUsize::new(5),
            calls: AtomicUsize::new(0),
        };
        let error = fetch_with_retry(&fetcher, "font.ttf").unwrap_err();
        assert!(matches!(error, InkError::SourceFetch { ref url, .. } if url == "font.ttf"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn file_fetcher_strips_the_file_scheme() {
        let fetcher = FileFetcher::new("/srv/assets");
        assert_eq!(
            fetcher.resolve("file://fonts/hand.ttf"),
            PathBuf::from("/srv/assets/fonts/hand.ttf")
        );
        assert_eq!(fetcher.resolve("/tmp/a.pdf"), PathBuf::from("/tmp/a.pdf"));
    }

    #[test]
    fn file_fetcher_refuses_remote_urls() {
        let fetcher = FileFetcher::new(".");
        let error = fetcher.fetch_bytes("https://cdn.example/font.ttf").unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::Unsupported);
    }

    #[test]
    fn debouncer_waits_for_the_quiet_period() {
        let start = Instant::now();
        let mut debouncer = SaveDebouncer::new(Duration::from_secs(2));
        debouncer.touch(1, start);
        debouncer.touch(2, start + Duration::from_millis(1500));

        assert!(debouncer.take_due(start + Duration::from_millis(1999)).is_empty());
        assert_eq!(debouncer.take_due(start + Duration::from_secs(2)), vec![1]);
        assert!(debouncer.is_pending(2));
        assert_eq!(
            debouncer.take_due(start + Duration::from_millis(3500)),
            vec![2]
        );
        assert!(!debouncer.is_pending(2));
    }

    fn snapshot_with_pages(count: u32) -> ProjectSnapshot {
        use crate::fonts::{FontFormat, FontRecord};
        use crate::settings::{PageGeometry, TextStyle};

        ProjectSnapshot {
            id: "doc".into(),
            font: FontRecord {
                id: "hand".into(),
                name: "Hand".into(),
                source_url: "hand.ttf".into(),
                format: FontFormat::Ttf,
                bytes: None,
            },
            source_pdf_url: "doc.pdf".into(),
            pages: (1..=count)
                .map(|n| PageContent::new(n, PageGeometry::default(), TextStyle::default()))
                .collect(),
        }
    }

    #[test]
    fn saving_a_page_replaces_or_appends_it() {
        let store = MemoryStore::new();
        store.save_project(&snapshot_with_pages(2)).expect("stored");

        let mut second = snapshot_with_pages(2).pages[1].clone();
        second.raw_text = "second".into();
        store.save_page("doc", &second).expect("replaced");

        let mut third = second.clone();
        third.page_number = 3;
        third.raw_text = "third".into();
        store.save_page("doc", &third).expect("appended");

        let pages = store.load_project("doc").expect("loaded").pages;
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1].raw_text, "second");
        assert_eq!(pages[2].raw_text, "third");

        let mut gap = third;
        gap.page_number = 5;
        assert!(matches!(
            store.save_page("doc", &gap),
            Err(InkError::PageNotFound(5))
        ));
        assert!(matches!(
            store.save_page("missing", &gap),
            Err(InkError::ProjectNotFound(_))
        ));
    }

    #[test]
    fn touching_again_restarts_the_timer() {
        let start = Instant::now();
        let mut debouncer = SaveDebouncer::new(Duration::from_secs(2));
        debouncer.touch(1, start);
        debouncer.touch(1, start + Duration::from_secs(1));
        assert!(debouncer.take_due(start + Duration::from_secs(2)).is_empty());
        assert_eq!(debouncer.take_due(start + Duration::from_secs(3)), vec![1]);
    }
}
