//! The per-document carrier that flows through the pipeline.

use crate::document::{DocId, Dmd};
use crate::external::IndexResult;
use crate::rlookup::RLookupRow;

/// Sentinel score a [`crate::external::ScoringFunction`] returns to signal
/// "drop this result". Scores produced by real scoring functions are
/// finite, so this is exactly distinguishable without a separate enum
/// variant.
pub const FILTEROUT: f64 = f64::NEG_INFINITY;

/// An explanation tree for how a result's score was computed.
#[derive(Debug, Clone)]
pub enum ScoreExplain {
    Leaf { description: String },
    Branch { description: String, children: Vec<ScoreExplain> },
}

/// One candidate document as it moves through the stage chain.
///
/// `index_result` is only meaningful upstream of the sorter, which detaches
/// it before a candidate is admitted to the heap; `dmd` and `rowdata`
/// persist for the result's whole lifetime.
#[derive(Debug, Default)]
pub struct SearchResult {
    pub doc_id: DocId,
    pub score: f64,
    pub index_result: Option<IndexResult>,
    pub score_explain: Option<ScoreExplain>,
    pub dmd: Option<Dmd>,
    pub rowdata: RLookupRow,
}

impl SearchResult {
    /// Resets a result to its empty state so it can be reused for the next
    /// pull. Releasing `dmd` here is exactly dropping the `Arc`.
    pub fn clear(&mut self) {
        self.doc_id = 0;
        self.score = 0.0;
        self.index_result = None;
        self.score_explain = None;
        self.dmd = None;
        self.rowdata.wipe();
    }

    /// Tears a result down completely. In this crate ordinary `Drop` already
    /// does this (every field owns what it holds); `destroy` exists only so
    /// call sites that want to be explicit about end-of-life can be, the way
    /// `SearchResult_Destroy` is an explicit call in the original engine.
    pub fn destroy(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_drops_dmd_and_wipes_row() {
        use crate::document::{DocFlags, DocumentMetadata};
        use std::sync::Arc;

        let mut r = SearchResult::default();
        r.doc_id = 7;
        r.score = 3.5;
        r.dmd = Some(Arc::new(DocumentMetadata {
            doc_id: 7,
            key: b"doc:7"[..].into(),
            flags: DocFlags::NONE,
            sort_vector: None,
        }));

        r.clear();

        assert_eq!(r.doc_id, 0);
        assert_eq!(r.score, 0.0);
        assert!(r.dmd.is_none());
    }
}
