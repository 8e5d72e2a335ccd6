//! Overflow propagation between consecutive pages
//!
//! Each page pair `(p, p + 1)` moves through three states:
//!
//! * `Idle`: page `p` fits its line budget.
//! * `Overflowing`: `p` spills and `p + 1` has not been visited, so the spill
//!   is written into `p + 1` along with `p`'s style and the cascade continues
//!   from `p + 1`.
//! * `Locked`: the user has visited `p + 1`. It is never written again for the
//!   rest of the session, whatever happens on `p`.
//!
//! The visited set lives in an explicit [`EditSession`] instead of UI state, so
//! the lock can be exercised without a renderer.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::settings::PageContent;
use crate::typography::layout_page;

/// Lines that did not fit on a page. An empty `overflow_lines` means the
/// page's overflow has resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverflowRecord {
    pub source_page_number: u32,
    pub overflow_lines: Vec<String>,
    pub total_line_count: usize,
}

impl OverflowRecord {
    /// Marker for a page that no longer spills.
    pub fn resolved(source_page_number: u32, total_line_count: usize) -> Self {
        OverflowRecord {
            source_page_number,
            overflow_lines: Vec::new(),
            total_line_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.overflow_lines.is_empty()
    }

    pub fn destination_page_number(&self) -> u32 {
        self.source_page_number + 1
    }

    /// The text written into the destination page.
    pub fn text(&self) -> String {
        self.overflow_lines.join("\n")
    }
}

/// Pages the user explicitly navigated to. Only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitedSet {
    pages: BTreeSet<u32>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the page was not visited before.
    pub fn insert(&mut self, page_number: u32) -> bool {
        self.pages.insert(page_number)
    }

    pub fn contains(&self, page_number: u32) -> bool {
        self.pages.contains(&page_number)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.pages.iter().copied()
    }
}

/// Where a pair of pages stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Idle,
    Overflowing,
    Locked,
}

/// Per-session editing state: visited pages, the page being edited, live
/// overflow records and the pages whose text came from propagation.
#[derive(Debug, Clone, Default)]
pub struct EditSession {
    visited: VisitedSet,
    current_page: Option<u32>,
    records: BTreeMap<u32, OverflowRecord>,
    auto_filled: BTreeSet<u32>,
}

impl EditSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visited(&self) -> &VisitedSet {
        &self.visited
    }

    pub fn current_page(&self) -> Option<u32> {
        self.current_page
    }

    pub fn is_locked(&self, page_number: u32) -> bool {
        self.visited.contains(page_number)
    }

    /// Whether the page's current text was written by propagation.
    pub fn is_auto_filled(&self, page_number: u32) -> bool {
        self.auto_filled.contains(&page_number)
    }

    /// Live overflow of `source_page_number`, if it spills.
    pub fn record(&self, source_page_number: u32) -> Option<&OverflowRecord> {
        self.records.get(&source_page_number)
    }

    pub fn records(&self) -> impl Iterator<Item = &OverflowRecord> {
        self.records.values()
    }

    /// Move to a page. It becomes visited, which locks it against
    /// propagation, and records of pairs that do not contain it are dropped.
    pub fn navigate_to(&mut self, page_number: u32) {
        if self.visited.insert(page_number) {
            log::debug!("Page {} visited, locking it against overflow", page_number);
        }
        self.current_page = Some(page_number);
        // A user-touched page keeps its text even if propagation wrote it first
        self.auto_filled.remove(&page_number);
        self.prune_records();
    }

    /// Drop records of pairs the current page is not part of.
    fn prune_records(&mut self) {
        if let Some(current) = self.current_page {
            self.records
                .retain(|&source, _| source == current || source + 1 == current);
        }
    }

    pub fn pair_state(&self, source_page_number: u32) -> PairState {
        if self.is_locked(source_page_number + 1) {
            PairState::Locked
        } else if self.records.contains_key(&source_page_number) {
            PairState::Overflowing
        } else {
            PairState::Idle
        }
    }
}

fn page_index(pages: &[PageContent], page_number: u32) -> Option<usize> {
    pages.iter().position(|page| page.page_number == page_number)
}

/// Applies overflow records to the pages they spill onto.
pub struct OverflowController;

impl OverflowController {
    /// React to a recomputed overflow of `record.source_page_number`.
    ///
    /// Writes into every unlocked page down the cascade and returns the page
    /// numbers whose content changed, in order.
    pub fn apply(
        pages: &mut [PageContent],
        session: &mut EditSession,
        record: OverflowRecord,
    ) -> Vec<u32> {
        let mut changed = Vec::new();
        let mut record = record;

        loop {
            let source = record.source_page_number;
            let destination = record.destination_page_number();

            if record.is_empty() {
                session.records.remove(&source);
                if !session.is_auto_filled(destination) || session.is_locked(destination) {
                    break;
                }
                let Some(index) = page_index(pages, destination) else {
                    break;
                };

                log::debug!(
                    "Overflow of page {} resolved, clearing page {}",
                    source,
                    destination
                );
                let page = &mut pages[index];
                page.raw_text.clear();
                session.auto_filled.remove(&destination);
                changed.push(destination);
                record = OverflowRecord::resolved(destination, 1);
                continue;
            }

            session.records.insert(source, record.clone());

            if session.is_locked(destination) {
                log::debug!(
                    "Page {} is locked, keeping {} overflow lines on page {} only",
                    destination,
                    record.overflow_lines.len(),
                    source
                );
                break;
            }

            let Some(source_style) = page_index(pages, source).map(|index| pages[index].style)
            else {
                break;
            };
            let Some(index) = page_index(pages, destination) else {
                log::warn!(
                    "Page {} is the last page, {} overflow lines have nowhere to go",
                    source,
                    record.overflow_lines.len()
                );
                break;
            };

            let text = record.text();
            let page = &mut pages[index];
            if page.raw_text != text || page.style != source_style {
                page.raw_text = text;
                page.style = source_style;
                changed.push(destination);
            }
            session.auto_filled.insert(destination);

            let layout = layout_page(page);
            record = layout
                .overflow
                .unwrap_or_else(|| OverflowRecord::resolved(destination, layout.lines.len()));
        }

        // Cascade pairs further down only live while the cascade runs
        session.prune_records();
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::InkColor;
    use crate::settings::{PageGeometry, TextStyle};
    use pretty_assertions::assert_eq;

    /// Three ruled lines per page: (256.8 - 93 - 80) / 24.6 = 3.4
    fn short_geometry() -> PageGeometry {
        PageGeometry {
            page_height: 256.8,
            ..PageGeometry::default()
        }
    }

    fn pages(count: u32) -> Vec<PageContent> {
        (1..=count)
            .map(|n| PageContent::new(n, short_geometry(), TextStyle::default()))
            .collect()
    }

    fn edit(pages: &mut [PageContent], session: &mut EditSession, page: u32, text: &str) -> Vec<u32> {
        let index = (page - 1) as usize;
        pages[index].raw_text = text.to_string();
        let layout = layout_page(&pages[index]);
        let record = layout
            .overflow
            .unwrap_or_else(|| OverflowRecord::resolved(page, layout.lines.len()));
        OverflowController::apply(pages, session, record)
    }

    #[test]
    fn overflow_fills_the_next_unvisited_page() {
        let mut pages = pages(2);
        let mut session = EditSession::new();
        session.navigate_to(1);

        let changed = edit(&mut pages, &mut session, 1, "a\nb\nc\nd\ne");
        assert_eq!(changed, vec![2]);
        assert_eq!(pages[1].raw_text, "d\ne");
        assert_eq!(session.pair_state(1), PairState::Overflowing);
    }

    #[test]
    fn style_is_carried_forward() {
        let mut pages = pages(2);
        pages[0].style = TextStyle {
            font_size: 20.0,
            color: InkColor::Purple,
            ..TextStyle::default()
        };
        let mut session = EditSession::new();
        session.navigate_to(1);

        edit(&mut pages, &mut session, 1, "a\nb\nc\nd");
        assert_eq!(pages[1].style.color, InkColor::Purple);
        assert_eq!(pages[1].style.font_size, 20.0);
    }

    #[test]
    fn a_visited_page_keeps_its_manual_edit() {
        let mut pages = pages(3);
        let mut session = EditSession::new();
        session.navigate_to(1);
        edit(&mut pages, &mut session, 1, "a\nb\nc\nd");
        assert_eq!(pages[1].raw_text, "d");

        session.navigate_to(2);
        edit(&mut pages, &mut session, 2, "manual");
        session.navigate_to(1);

        let changed = edit(&mut pages, &mut session, 1, "a\nb\nc\nx\ny\nz");
        assert!(changed.is_empty());
        assert_eq!(pages[1].raw_text, "manual");
        assert_eq!(session.pair_state(1), PairState::Locked);
    }

    #[test]
    fn overflow_cascades_across_several_pages() {
        let mut pages = pages(3);
        let mut session = EditSession::new();
        session.navigate_to(1);

        let changed = edit(&mut pages, &mut session, 1, "1\n2\n3\n4\n5\n6\n7\n8");
        assert_eq!(changed, vec![2, 3]);
        assert_eq!(pages[1].raw_text, "4\n5\n6\n7\n8");
        assert_eq!(pages[2].raw_text, "7\n8");
    }

    #[test]
    fn resolving_overflow_clears_the_auto_filled_page() {
        let mut pages = pages(2);
        let mut session = EditSession::new();
        session.navigate_to(1);
        edit(&mut pages, &mut session, 1, "a\nb\nc\nd");
        assert_eq!(pages[1].raw_text, "d");

        let changed = edit(&mut pages, &mut session, 1, "a\nb\nc");
        assert_eq!(changed, vec![2]);
        assert_eq!(pages[1].raw_text, "");
        assert_eq!(session.pair_state(1), PairState::Idle);
    }

    #[test]
    fn resolving_overflow_never_clears_user_text() {
        let mut pages = pages(2);
        pages[1].raw_text = "typed earlier".to_string();
        let mut session = EditSession::new();
        session.navigate_to(1);

        let changed = edit(&mut pages, &mut session, 1, "short");
        assert!(changed.is_empty());
        assert_eq!(pages[1].raw_text, "typed earlier");
    }

    #[test]
    fn overflow_of_the_last_page_is_only_recorded() {
        let mut pages = pages(1);
        let mut session = EditSession::new();
        session.navigate_to(1);

        let changed = edit(&mut pages, &mut session, 1, "a\nb\nc\nd");
        assert!(changed.is_empty());
        let record = session.record(1).expect("record kept");
        assert_eq!(record.overflow_lines, vec!["d".to_string()]);
        assert_eq!(record.total_line_count, 4);
    }

    #[test]
    fn leaving_a_pair_discards_its_record() {
        let mut pages = pages(4);
        let mut session = EditSession::new();
        session.navigate_to(1);
        edit(&mut pages, &mut session, 1, "a\nb\nc\nd");
        assert!(session.record(1).is_some());

        session.navigate_to(2);
        assert!(session.record(1).is_some());
        session.navigate_to(4);
        assert!(session.record(1).is_none());
    }

    #[test]
    fn cascade_keeps_only_the_record_of_the_edited_pair() {
        let mut pages = pages(4);
        let mut session = EditSession::new();
        session.navigate_to(1);

        let changed = edit(&mut pages, &mut session, 1, "1\n2\n3\n4\n5\n6\n7\n8\n9\n10");
        assert_eq!(changed, vec![2, 3, 4]);
        assert_eq!(session.record(1).map(|record| record.overflow_lines.len()), Some(7));
        assert!(session.record(2).is_none());
        assert!(session.record(3).is_none());
        assert_eq!(session.records().count(), 1);
        assert_eq!(session.pair_state(2), PairState::Idle);
    }

    #[test]
    fn visited_set_only_grows() {
        let mut session = EditSession::new();
        session.navigate_to(3);
        session.navigate_to(1);
        session.navigate_to(3);
        assert_eq!(session.visited().iter().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(session.current_page(), Some(3));
    }
}
