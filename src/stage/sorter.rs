//! Top-K sorter, the hard core of the pipeline.
//!
//! Accumulate and yield are modeled as an explicit [`SorterState`] rather
//! than swapping a function pointer at runtime. The internal queued state
//! never crosses the `Stage` boundary; it is just the body of the
//! accumulate loop below.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::context::{PipelineContext, TimeoutPolicy};
use crate::external::{LoadMode, LoadOptions, RLookupLoader};
use crate::heap::MinMaxHeap;
use crate::result::SearchResult;
use crate::rlookup::{compare_values, RLookup, RLookupKey};
use crate::stage::{Stage, StageKind, Status};

/// The ascending bitmap is packed into a `u8`, capping the number of sort
/// keys a single compare call can weigh in on.
pub const SORTASCMAP_MAXFIELDS: usize = 8;

fn ascend_bit(map: u8, i: usize) -> bool {
    (map >> i) & 1 != 0
}

/// Ascending compare on `score`; tie-break by descending `docId`.
pub fn compare_by_score(a: &SearchResult, b: &SearchResult) -> Ordering {
    match a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal) {
        Ordering::Equal => {
            if a.doc_id > b.doc_id {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        other => other,
    }
}

/// Iterates up to `min(keys.len(), SORTASCMAP_MAXFIELDS)` sort keys.
/// A value present on one side and missing on the other decides the
/// comparison outright, unaffected by the ascend bit; two present values
/// compare by [`compare_values`] and invert on a tie-break or the ascend
/// bit; two missing values tie-break on ascending `docId`, inverted by the
/// ascend bit. Exhausting every key without a decision falls back to
/// ascending `docId`, inverted by the *last* key's ascend bit.
pub fn compare_by_fields(
    a: &SearchResult,
    b: &SearchResult,
    keys: &[Arc<RLookupKey>],
    ascend_map: u8,
) -> Ordering {
    let nkeys = keys.len().min(SORTASCMAP_MAXFIELDS);
    let mut last_ascending = false;

    for (idx, key) in keys.iter().enumerate().take(nkeys) {
        let v1 = a.rowdata.get_item(key);
        let v2 = b.rowdata.get_item(key);
        let ascending = ascend_bit(ascend_map, idx);
        last_ascending = ascending;

        match (v1, v2) {
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => {
                let rc = docid_order(a.doc_id, b.doc_id);
                return if ascending { rc.reverse() } else { rc };
            }
            (Some(x), Some(y)) => {
                let rc = compare_values(x, y);
                if rc != Ordering::Equal {
                    return if ascending { rc.reverse() } else { rc };
                }
            }
        }
    }

    let rc = docid_order(a.doc_id, b.doc_id);
    if last_ascending {
        rc.reverse()
    } else {
        rc
    }
}

fn docid_order(a: u64, b: u64) -> Ordering {
    if a < b {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

fn compare_dispatch(compare: &CompareKind, a: &SearchResult, b: &SearchResult) -> Ordering {
    match compare {
        CompareKind::ByScore => compare_by_score(a, b),
        CompareKind::ByFields { keys, ascend_map } => compare_by_fields(a, b, keys, *ascend_map),
    }
}

pub enum CompareKind {
    ByScore,
    ByFields { keys: Vec<Arc<RLookupKey>>, ascend_map: u8 },
}

enum SorterState {
    Accumulate,
    Yield,
}

pub struct SorterStage {
    upstream: Box<dyn Stage>,
    state: SorterState,
    heap: MinMaxHeap<SearchResult>,
    /// Requested top-K; `0` means an unbounded, dynamically growing heap.
    size: usize,
    /// Secondary offset, for a sorter also asked to page (normally `0`).
    offset: u64,
    compare: CompareKind,
    loader: Option<Arc<dyn RLookupLoader>>,
    lookup: Option<Arc<RLookup>>,
    /// `None` until resolved on the first accumulated result.
    load_keys: Option<Vec<Arc<RLookupKey>>>,
    /// The pooled slot the accumulate loop reuses to avoid per-result churn.
    candidate: SearchResult,
}

impl SorterStage {
    pub fn new_by_score(upstream: Box<dyn Stage>, size: usize) -> Self {
        Self::new_inner(upstream, size, CompareKind::ByScore, None, None)
    }

    pub fn new_by_fields(
        upstream: Box<dyn Stage>,
        size: usize,
        keys: Vec<Arc<RLookupKey>>,
        ascend_map: u8,
        loader: Arc<dyn RLookupLoader>,
        lookup: Arc<RLookup>,
    ) -> Self {
        Self::new_inner(
            upstream,
            size,
            CompareKind::ByFields { keys, ascend_map },
            Some(loader),
            Some(lookup),
        )
    }

    fn new_inner(
        upstream: Box<dyn Stage>,
        size: usize,
        compare: CompareKind,
        loader: Option<Arc<dyn RLookupLoader>>,
        lookup: Option<Arc<RLookup>>,
    ) -> Self {
        Self {
            upstream,
            state: SorterState::Accumulate,
            heap: MinMaxHeap::new(),
            size,
            offset: 0,
            compare,
            loader,
            lookup,
            load_keys: None,
            candidate: SearchResult::default(),
        }
    }

    /// Resolves, once, which sort keys still need a load.
    fn resolve_load_keys(&mut self) {
        let CompareKind::ByFields { keys, .. } = &self.compare else {
            return;
        };
        if keys.is_empty() || self.load_keys.is_some() {
            return;
        }
        let missing = if self.candidate.rowdata.sv.is_none() && !self.candidate.rowdata.has_dynamic_overlay() {
            keys.clone()
        } else {
            keys.iter().filter(|k| self.candidate.rowdata.get_item(k).is_none()).cloned().collect()
        };
        self.load_keys = Some(missing);
    }

    /// Loads any missing sort keys for the pooled candidate. Returns
    /// `false` if the load failed and the candidate must be discarded
    /// without being admitted.
    fn load_missing_fields(&mut self, ctx: &mut PipelineContext) -> bool {
        let has_keys = matches!(&self.compare, CompareKind::ByFields { keys, .. } if !keys.is_empty());
        if !has_keys || self.candidate.dmd.is_none() {
            return true;
        }

        self.resolve_load_keys();
        let load_keys = self.load_keys.clone().unwrap_or_default();
        if load_keys.is_empty() {
            return true;
        }

        let (Some(loader), Some(lookup)) = (&self.loader, &self.lookup) else {
            return true;
        };
        let dmd = self.candidate.dmd.clone().expect("checked above");
        let options =
            LoadOptions { dmd: &dmd, keys: &load_keys, mode: LoadMode::KeyList, no_sortables: true, force_string: true };

        if let Err(e) = loader.load_document(lookup, &mut self.candidate.rowdata, options) {
            tracing::debug!(doc_id = self.candidate.doc_id, error = %e, "sort-key load failed, dropping candidate");
            self.candidate.dmd = None;
            ctx.total_results = ctx.total_results.saturating_sub(1);
            self.candidate.clear();
            return false;
        }
        true
    }

    /// Detaches the transient index result and admits the candidate into
    /// the heap, evicting the current min if it ranks lower.
    fn admit(&mut self, ctx: &mut PipelineContext) {
        let mut candidate = std::mem::take(&mut self.candidate);
        candidate.index_result = None;

        let heap_not_full = self.size == 0 || self.heap.len() < self.size;
        let compare = &self.compare;
        if heap_not_full {
            if candidate.score < ctx.min_score {
                ctx.min_score = candidate.score;
            }
            self.heap.push(candidate, &|a, b| compare_dispatch(compare, a, b));
            return;
        }

        let min_score = self.heap.peek_min().map(|m| m.score).unwrap_or(f64::NEG_INFINITY);
        if min_score > ctx.min_score {
            ctx.min_score = min_score;
        }

        let ranks_above_min = self
            .heap
            .peek_min()
            .map(|min| compare_dispatch(compare, &candidate, min) == Ordering::Greater)
            .unwrap_or(true);

        if ranks_above_min {
            let _evicted = self.heap.pop_min(&|a, b| compare_dispatch(compare, a, b));
            self.heap.push(candidate, &|a, b| compare_dispatch(compare, a, b));
        }
        // else: candidate is simply dropped here (pooled slot already taken).
    }

    fn yield_step(&mut self, out: &mut SearchResult) -> Status {
        if self.heap.is_empty() {
            return Status::Eof;
        }
        let proceed = if self.size == 0 {
            true
        } else {
            let proceed = self.offset < self.size as u64;
            self.offset += 1;
            proceed
        };
        if !proceed {
            return Status::Eof;
        }
        let compare = &self.compare;
        let popped =
            self.heap.pop_max(&|a, b| compare_dispatch(compare, a, b)).expect("checked non-empty above");
        *out = popped;
        Status::Ok
    }
}

impl Stage for SorterStage {
    fn kind(&self) -> StageKind {
        StageKind::Sorter
    }

    #[tracing::instrument(level = "trace", skip_all, target = "pipeline::sorter")]
    fn next(&mut self, ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
        if matches!(self.state, SorterState::Yield) {
            return self.yield_step(out);
        }

        loop {
            self.candidate.clear();
            let status = self.upstream.next(ctx, &mut self.candidate);
            match status {
                Status::Ok => {
                    if !self.load_missing_fields(ctx) {
                        continue;
                    }
                    self.admit(ctx);
                    continue;
                }
                Status::Eof => {
                    self.state = SorterState::Yield;
                    return self.yield_step(out);
                }
                Status::Timedout if ctx.timeout_policy == TimeoutPolicy::Return => {
                    self.state = SorterState::Yield;
                    return self.yield_step(out);
                }
                other => return other,
            }
        }
    }
}
