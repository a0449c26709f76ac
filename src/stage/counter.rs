//! Terminal counting stage.
//!
//! Drains upstream to `EOF`, counting and clearing every result; a `COUNT`
//! query never returns individual results, only the total.

use crate::context::PipelineContext;
use crate::result::SearchResult;
use crate::stage::{Stage, StageKind, Status};

pub struct CounterStage {
    upstream: Box<dyn Stage>,
    count: u64,
}

impl CounterStage {
    pub fn new(upstream: Box<dyn Stage>) -> Self {
        Self { upstream, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Stage for CounterStage {
    fn kind(&self) -> StageKind {
        StageKind::Counter
    }

    fn next(&mut self, ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
        loop {
            let status = self.upstream.next(ctx, out);
            match status {
                Status::Ok => {
                    self.count += 1;
                    out.clear();
                    continue;
                }
                Status::Eof => {
                    if self.upstream.kind() == StageKind::Profiler {
                        self.upstream.bump_terminal_eof();
                    }
                    return Status::Eof;
                }
                other => return other,
            }
        }
    }
}
