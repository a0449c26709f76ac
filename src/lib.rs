//! A pull-driven result-processing pipeline for a query engine embedded in a
//! key-value store.
//!
//! A [`Pipeline`](stage::Pipeline) is a linear chain of [`Stage`](stage::Stage)s,
//! each owning its upstream. The terminal consumer drives the whole chain by
//! repeatedly calling [`Stage::next`](stage::Stage::next) on the tail; every
//! stage pulls from its own upstream in turn. This crate implements the
//! stage kinds and the collaborator contracts they're built against, but
//! not the collaborators themselves. Index storage, scoring plugins, the
//! keyspace mutex, and the sharding oracle are all supplied by the
//! embedding host.

pub mod context;
pub mod document;
pub mod error;
pub mod external;
pub mod heap;
pub mod result;
pub mod rlookup;
pub mod stage;

pub use context::{Deadline, PipelineContext, TimeoutPolicy};
pub use document::{DocFlags, DocId, Dmd, DocumentMetadata};
pub use error::{LoaderError, PipelineError, ScorerError};
pub use external::{
    DocumentTable, IndexLock, IndexResult, IterStatus, KeyspaceMutex, LoadMode, LoadOptions, LockStatus,
    PostingIterator, RLookupLoader, ScoreOutput, ScoringFunction, ShardingOracle,
};
pub use result::{ScoreExplain, SearchResult, FILTEROUT};
pub use rlookup::{compare_values, FieldValue, RLookup, RLookupKey, RLookupRow, SortVector};
pub use stage::{
    DEFAULT_DEADLINE_SAMPLE_PERIOD, DEFAULT_QUERY_BUDGET, Pipeline, ProfileStats, Stage, StageKind, Status,
};
pub use stage::buffer_lock::{BufferAndLockStage, UnlockerStage};
pub use stage::counter::CounterStage;
pub use stage::index_iterator::IndexIteratorStage;
pub use stage::loader::LoaderStage;
pub use stage::metrics::MetricsStage;
pub use stage::pager::PagerStage;
pub use stage::profiler::ProfilerStage;
pub use stage::scorer::ScorerStage;
pub use stage::sorter::{compare_by_fields, compare_by_score, CompareKind, SorterStage, SORTASCMAP_MAXFIELDS};

/// Initializes a `tracing` subscriber once for the test binary, so `trace`/
/// `debug` output from stage `next` calls is visible under `RUST_LOG`
/// instead of silently discarded.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
    });
}
