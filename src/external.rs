//! The collaborator contracts this crate is built against.
//!
//! None of these are implemented here. Index storage, scoring plugins, the
//! keyspace mutex, and the sharding oracle are all supplied by the
//! embedding host. Each contract is a narrow trait scoped to one seam,
//! fallible wherever the collaborator it stands in for can fail.

use std::sync::Arc;

use crate::document::{DocId, Dmd};
use crate::error::{LoaderError, ScorerError};
use crate::result::ScoreExplain;
use crate::rlookup::{FieldValue, RLookup, RLookupKey, RLookupRow};

/// Outcome of one posting-iterator read.
pub enum IterStatus {
    Ok,
    Eof,
    Timedout,
    NotFound,
}

/// The scoring-relevant payload a posting iterator produces for one document.
/// `metrics` are pre-resolved `(key, value)` pairs the metrics stage copies
/// into a result's row; the keys are expected to have been declared in the
/// same [`RLookup`] the pipeline's stages were built against.
#[derive(Debug, Clone)]
pub struct IndexResult {
    pub doc_id: DocId,
    pub metrics: Vec<(Arc<RLookupKey>, FieldValue)>,
}

/// A single posting-list cursor. Borrowed by the source stage; it must not
/// be advanced from anywhere else while a query is draining.
pub trait PostingIterator {
    fn read(&mut self) -> (IterStatus, Option<IndexResult>);
}

/// Resolves a document id to its refcounted metadata handle.
pub trait DocumentTable {
    fn borrow(&self, doc_id: DocId) -> Option<Dmd>;
}

/// Output of one scoring call.
pub struct ScoreOutput {
    pub score: f64,
    pub explain: Option<ScoreExplain>,
}

/// A scoring plugin. Returns [`crate::result::FILTEROUT`] as the score to
/// drop a candidate entirely.
pub trait ScoringFunction {
    fn score(
        &mut self,
        index_result: Option<&IndexResult>,
        dmd: Option<&Dmd>,
        min_score: f64,
    ) -> Result<ScoreOutput, ScorerError>;
}

/// Which fields a load call should populate.
pub enum LoadMode {
    AllKeys,
    KeyList,
}

pub struct LoadOptions<'a> {
    pub dmd: &'a Dmd,
    /// Consulted only in `KeyList` mode.
    pub keys: &'a [Arc<RLookupKey>],
    pub mode: LoadMode,
    pub no_sortables: bool,
    pub force_string: bool,
}

/// Loads field values for one document into a result's row. Used by both
/// the sorter's missing-key resolution and the field loader stage.
pub trait RLookupLoader {
    fn load_document(
        &self,
        lookup: &RLookup,
        row: &mut RLookupRow,
        options: LoadOptions,
    ) -> Result<(), LoaderError>;
}

/// Result of a non-blocking lock attempt.
pub enum LockStatus {
    Ok,
    Busy,
}

/// The keyspace-wide mutex the buffer-and-lock stage hands off to.
pub trait KeyspaceMutex {
    fn try_lock(&self) -> LockStatus;
    fn lock(&self);
    fn unlock(&self);
}

/// The index read-lock the worker thread holds for the query, plus the
/// index-version counter used to detect mutation across a lock handoff.
/// Buffer-and-lock releases the lock but never re-acquires it.
pub trait IndexLock {
    fn unlock_spec(&self);
    fn current_version(&self) -> u64;
}

/// Resolves a document key to a cluster slot, and reports the local node's
/// owned slot range, for the source stage's sharding trim.
pub trait ShardingOracle {
    fn key_to_slot(&self, key: &[u8]) -> u16;
    fn local_slot_range(&self) -> (u16, u16);
}
