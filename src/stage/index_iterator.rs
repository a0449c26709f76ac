//! The chain's source stage.
//!
//! Performs a sampling-counter timeout check, borrows and skips missing or
//! deleted documents, applies an optional shard-range trim, and increments
//! `totalResults` for every document it emits.

use crate::context::PipelineContext;
use crate::document::DocFlags;
use crate::external::{DocumentTable, IterStatus, PostingIterator, ShardingOracle};
use crate::result::SearchResult;
use crate::stage::{Stage, StageKind, Status};

pub struct IndexIteratorStage<I, D> {
    iter: Option<I>,
    docs: D,
    sharding: Option<Box<dyn ShardingOracle>>,
    sample_period: u32,
    calls_since_sample: u32,
}

impl<I: PostingIterator, D: DocumentTable> IndexIteratorStage<I, D> {
    pub fn new(iter: Option<I>, docs: D, sample_period: u32) -> Self {
        Self { iter, docs, sharding: None, sample_period: sample_period.max(1), calls_since_sample: 0 }
    }

    pub fn with_sharding(mut self, oracle: Box<dyn ShardingOracle>) -> Self {
        self.sharding = Some(oracle);
        self
    }
}

impl<I: PostingIterator, D: DocumentTable> Stage for IndexIteratorStage<I, D> {
    fn kind(&self) -> StageKind {
        StageKind::Index
    }

    #[tracing::instrument(level = "trace", skip_all, target = "pipeline::index")]
    fn next(&mut self, ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
        self.calls_since_sample += 1;
        if self.calls_since_sample >= self.sample_period {
            self.calls_since_sample = 0;
            if ctx.deadline.exceeded() {
                return Status::Timedout;
            }
        }

        let Some(iter) = self.iter.as_mut() else {
            return Status::Eof;
        };

        loop {
            let (status, result) = iter.read();
            match status {
                IterStatus::Eof => return Status::Eof,
                IterStatus::Timedout => return Status::Timedout,
                IterStatus::NotFound => continue,
                IterStatus::Ok => {
                    // A positive status with a null result is treated the
                    // same as NOT_FOUND.
                    let Some(ir) = result else { continue };
                    let Some(dmd) = self.docs.borrow(ir.doc_id) else { continue };
                    if dmd.flags.contains(DocFlags::DELETED) {
                        continue;
                    }
                    if let Some(oracle) = &self.sharding {
                        let slot = oracle.key_to_slot(&dmd.key);
                        let (first, last) = oracle.local_slot_range();
                        if slot < first || slot > last {
                            continue;
                        }
                    }

                    ctx.total_results += 1;
                    out.doc_id = ir.doc_id;
                    out.rowdata.sv = dmd.sort_vector.clone();
                    out.dmd = Some(dmd);
                    out.index_result = Some(ir);
                    out.score = 0.0;
                    return Status::Ok;
                }
            }
        }
    }
}
