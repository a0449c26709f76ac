//! Offset/limit paging.
//!
//! Discards `offset` results, forwards up to `limit`, then returns `EOF`.
//! Discarded results are cleared so their `dmd` reference is released via
//! the `Arc` drop in `SearchResult::clear`.

use crate::context::PipelineContext;
use crate::result::SearchResult;
use crate::stage::{Stage, StageKind, Status};

pub struct PagerStage {
    upstream: Box<dyn Stage>,
    offset: u64,
    limit: u64,
    count: u64,
}

impl PagerStage {
    pub fn new(upstream: Box<dyn Stage>, offset: u64, limit: u64) -> Self {
        Self { upstream, offset, limit, count: 0 }
    }
}

impl Stage for PagerStage {
    fn kind(&self) -> StageKind {
        StageKind::Pager
    }

    fn next(&mut self, ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
        while self.count < self.offset {
            let status = self.upstream.next(ctx, out);
            if status != Status::Ok {
                return status;
            }
            self.count += 1;
            out.clear();
        }
        if self.count >= self.offset + self.limit {
            return Status::Eof;
        }
        self.count += 1;
        self.upstream.next(ctx, out)
    }
}
