//! Document-order input handed over by the parsing layer.
//!
//! The engine consumes this read-only: segments drive batching, the page
//! map picks the starting segment and tracks the page under the current
//! highlight, and the optional table of contents labels chapter starts.

use crate::core::batch::Segment;

/// One table-of-contents entry mapping a page to a chapter label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub page: usize,
    pub label: String,
}

/// Ordered segments plus page structure for one document.
#[derive(Debug, Clone, Default)]
pub struct DocumentInput {
    /// All segments in document order. `segments[i].index == i`.
    pub segments: Vec<Segment>,
    /// Page index per segment, parallel to `segments`.
    pub segment_pages: Vec<usize>,
    /// Optional chapter starts, ascending by page.
    pub toc: Vec<TocEntry>,
}

impl DocumentInput {
    pub fn new(segments: Vec<Segment>, segment_pages: Vec<usize>, toc: Vec<TocEntry>) -> Self {
        debug_assert_eq!(segments.len(), segment_pages.len());
        Self {
            segments,
            segment_pages,
            toc,
        }
    }

    /// Index of the first segment on `page`, or 0 when the page has none.
    pub fn start_index_for_page(&self, page: usize) -> usize {
        self.segment_pages
            .iter()
            .position(|&p| p == page)
            .unwrap_or(0)
    }

    /// Page holding the given segment.
    pub fn page_of(&self, segment_index: usize) -> Option<usize> {
        self.segment_pages.get(segment_index).copied()
    }

    /// Chapter label when `page` is a chapter start.
    pub fn chapter_label(&self, page: usize) -> Option<&str> {
        self.toc
            .iter()
            .find(|entry| entry.page == page)
            .map(|entry| entry.label.as_str())
    }
}
