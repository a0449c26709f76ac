//! The stage chain: a narrow trait plus an owned, tail-to-head chain of
//! boxed stages.
//!
//! Each stage owns its upstream as a `Box<dyn Stage>`, giving explicit
//! unique ownership of each stage by the one downstream of it instead of a
//! vector-indexed chain. This makes cycles impossible by construction and
//! gives "source freed last" disposal for free: dropping the tail stage
//! recursively drops its `upstream` field, so the source (innermost stage)
//! is always dropped last, with no custom disposal walk needed.

pub mod buffer_lock;
pub mod counter;
pub mod index_iterator;
pub mod loader;
pub mod metrics;
pub mod pager;
pub mod profiler;
pub mod scorer;
pub mod sorter;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::result::SearchResult;

pub use profiler::ProfileStats;

/// What kind of stage this is. Used by the counter to spot a profiler
/// immediately upstream and by tests/diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Index,
    Scorer,
    Metrics,
    Sorter,
    Pager,
    Loader,
    Counter,
    Profiler,
    BufferLock,
    Unlocker,
}

/// Status returned by every stage's `next`. The sorter's internal queued
/// state, used only between its accumulate and yield phases, never appears
/// here; it is modeled as a private control-flow enum inside the sorter
/// instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Eof,
    Timedout,
    Error,
}

/// One node of the pipeline.
pub trait Stage {
    fn kind(&self) -> StageKind;

    fn next(&mut self, ctx: &mut PipelineContext, out: &mut SearchResult) -> Status;

    /// Called by the counter stage when it reaches a terminal, non-OK pull
    /// from an immediate upstream that is a profiler, to compensate the
    /// profiler's invocation count for the EOF read the counter itself
    /// consumed. A no-op for every stage except the profiler.
    fn bump_terminal_eof(&mut self) {}
}

/// The linear chain of stages. Holds only the tail; every stage upstream of
/// it is reachable by walking `upstream` fields.
pub struct Pipeline {
    tail: Option<Box<dyn Stage>>,
    auto_profile: bool,
    profiles: Vec<(StageKind, Rc<Cell<ProfileStats>>)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { tail: None, auto_profile: false, profiles: Vec::new() }
    }

    /// A pipeline that transparently wraps every non-source stage pushed to
    /// it in a profiler, without requiring the caller to interleave
    /// `push_profiler` calls by hand.
    pub fn with_profiling() -> Self {
        Self { tail: None, auto_profile: true, profiles: Vec::new() }
    }

    /// Pushes the chain's head, the source stage. Must be called exactly
    /// once, before any other `push`. Never profiled, unlike every stage
    /// pushed after it.
    pub fn push_source<S: Stage + 'static>(&mut self, stage: S) -> &mut Self {
        assert!(self.tail.is_none(), "pipeline already has a source stage");
        self.tail = Some(Box::new(stage));
        self
    }

    /// Appends a new tail whose upstream is the current tail.
    pub fn push<S, F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(Box<dyn Stage>) -> S,
        S: Stage + 'static,
    {
        let upstream = self.tail.take().expect("pipeline has no source stage yet");
        let built = build(upstream);
        let kind = built.kind();
        if self.auto_profile {
            let stats = Rc::new(Cell::new(ProfileStats::default()));
            self.profiles.push((kind, stats.clone()));
            self.tail = Some(Box::new(profiler::ProfilerStage::new(Box::new(built), stats)));
        } else {
            self.tail = Some(Box::new(built));
        }
        self
    }

    /// Manually wraps the current tail in a profiler, returning a handle the
    /// caller keeps to read its stats after `drain`. Use this on a
    /// `Pipeline::new()` built without `with_profiling` when only specific
    /// stages need timing.
    pub fn push_profiler(&mut self) -> Rc<Cell<ProfileStats>> {
        let stats = Rc::new(Cell::new(ProfileStats::default()));
        let handle = stats.clone();
        let upstream = self.tail.take().expect("pipeline has no stages to wrap");
        self.tail = Some(Box::new(profiler::ProfilerStage::new(upstream, stats)));
        handle
    }

    /// Stats handles collected for every stage wrapped by `with_profiling`,
    /// in the order they were pushed (source-to-tail).
    pub fn profiles(&self) -> &[(StageKind, Rc<Cell<ProfileStats>>)] {
        &self.profiles
    }

    /// Pulls `next` on the tail until `EOF` or an error, collecting every
    /// `OK` result.
    pub fn drain(&mut self, ctx: &mut PipelineContext) -> Result<Vec<SearchResult>, PipelineError> {
        let mut out = Vec::new();
        loop {
            let mut res = SearchResult::default();
            let tail = self.tail.as_mut().expect("pipeline has no stages");
            match tail.next(ctx, &mut res) {
                Status::Ok => out.push(res),
                Status::Eof => break,
                Status::Timedout => return Err(PipelineError::TimedOut),
                Status::Error => return Err(ctx.err.take().unwrap_or(PipelineError::TimedOut)),
            }
        }
        Ok(out)
    }

    /// Tears the whole chain down. In this crate, ordinary `Drop` already
    /// walks tail-to-source releasing every stage's owned state, including a
    /// sorter's buffered heap; this method exists only to give disposal an
    /// explicit call site.
    pub fn dispose(self) {}
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline sampling default: the source stage checks the clock every this
/// many pulls, amortizing the cost of reading it.
pub const DEFAULT_DEADLINE_SAMPLE_PERIOD: u32 = 64;

/// Default query time budget, bounding worst-case query latency without the
/// caller having to pick a number.
pub const DEFAULT_QUERY_BUDGET: Duration = Duration::from_millis(1500);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Deadline, TimeoutPolicy};
    use crate::stage::pager::PagerStage;
    use crate::stage::sorter::SorterStage;

    struct VecStage(std::vec::IntoIter<(u64, f64)>);
    impl Stage for VecStage {
        fn kind(&self) -> StageKind {
            StageKind::Index
        }
        fn next(&mut self, ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
            match self.0.next() {
                Some((id, score)) => {
                    ctx.total_results += 1;
                    out.doc_id = id;
                    out.score = score;
                    Status::Ok
                }
                None => Status::Eof,
            }
        }
    }

    /// Sorter K=4 over `[(1,.2),(2,.9),(3,.5),(4,.9)]` then pager offset=1
    /// limit=2, exercising `Pipeline::push`/`drain` end to end rather than
    /// driving a single stage directly.
    #[test]
    fn pager_over_sorter_through_a_pushed_pipeline() {
        let input = vec![(1, 0.2), (2, 0.9), (3, 0.5), (4, 0.9)];
        let mut pipeline = Pipeline::new();
        pipeline.push_source(VecStage(input.into_iter()));
        pipeline.push(|upstream| SorterStage::new_by_score(upstream, 4));
        pipeline.push(|upstream| PagerStage::new(upstream, 1, 2));

        let mut ctx = PipelineContext::new(Deadline::max(), TimeoutPolicy::Return);
        let results = pipeline.drain(&mut ctx).expect("drain succeeds");

        assert_eq!(results.iter().map(|r| r.doc_id).collect::<Vec<_>>(), vec![4, 3]);
    }

    /// `with_profiling` wraps every non-source stage, and stats accumulate
    /// one invocation per pull once the chain has been drained.
    #[test]
    fn with_profiling_wraps_every_non_source_stage() {
        let input = vec![(1, 0.4), (2, 0.6)];
        let mut pipeline = Pipeline::with_profiling();
        pipeline.push_source(VecStage(input.into_iter()));
        pipeline.push(|upstream| SorterStage::new_by_score(upstream, 0));

        let mut ctx = PipelineContext::new(Deadline::max(), TimeoutPolicy::Return);
        let results = pipeline.drain(&mut ctx).expect("drain succeeds");

        assert_eq!(results.len(), 2);
        assert_eq!(pipeline.profiles().len(), 1);
        let (kind, stats) = &pipeline.profiles()[0];
        assert_eq!(*kind, StageKind::Sorter);
        // One profiled `next()` per pipeline pull: the first call runs the
        // whole accumulate phase internally and yields the first result,
        // the second yields the last buffered result, the third drains to
        // EOF.
        assert_eq!(stats.get().invocations, 3);
    }

    struct DmdStage(std::vec::IntoIter<crate::document::Dmd>, u64);
    impl Stage for DmdStage {
        fn kind(&self) -> StageKind {
            StageKind::Index
        }
        fn next(&mut self, _ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
            match self.0.next() {
                Some(dmd) => {
                    self.1 += 1;
                    out.doc_id = dmd.doc_id;
                    out.score = self.1 as f64;
                    out.dmd = Some(dmd);
                    Status::Ok
                }
                None => Status::Eof,
            }
        }
    }

    /// A `dmd` handed to a pipeline is an `Arc`; every clone made along the
    /// way (sorter candidate, pager passthrough, drained `Vec`) is released
    /// once the drained results and the pipeline itself are dropped, so the
    /// strong count returns to the one held by the test's own `dmds` vector.
    #[quickcheck_macros::quickcheck]
    fn dmd_refcount_returns_to_baseline_after_pipeline_disposal(doc_ids: Vec<u8>) -> bool {
        use crate::document::{DocFlags, DocumentMetadata};
        use std::sync::Arc;

        let dmds: Vec<crate::document::Dmd> = doc_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                Arc::new(DocumentMetadata {
                    doc_id: id as u64,
                    key: format!("d{i}").into_bytes().into_boxed_slice(),
                    flags: DocFlags::NONE,
                    sort_vector: None,
                })
            })
            .collect();

        let mut pipeline = Pipeline::new();
        pipeline.push_source(DmdStage(dmds.clone().into_iter(), 0));
        pipeline.push(|upstream| SorterStage::new_by_score(upstream, 0));
        pipeline.push(|upstream| PagerStage::new(upstream, 0, u64::MAX));

        let mut ctx = PipelineContext::new(Deadline::max(), TimeoutPolicy::Return);
        let results = match pipeline.drain(&mut ctx) {
            Ok(results) => results,
            Err(_) => return false,
        };
        let produced = results.len() == dmds.len();

        drop(results);
        pipeline.dispose();

        produced && dmds.iter().all(|d| Arc::strong_count(d) == 1)
    }
}
