//! Pluggable scoring.
//!
//! Loops past upstream `FILTEROUT` results, decrementing `totalResults` and
//! clearing each one, and emits the first result the scoring function
//! keeps. `ScoringFunction::score` returns an owned `Option<ScoreExplain>`
//! each call, so handing an explanation to the result needs no separate
//! buffer management.

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::external::ScoringFunction;
use crate::result::{SearchResult, FILTEROUT};
use crate::stage::{Stage, StageKind, Status};

pub struct ScorerStage {
    upstream: Box<dyn Stage>,
    scorer: Box<dyn ScoringFunction>,
}

impl ScorerStage {
    pub fn new(upstream: Box<dyn Stage>, scorer: Box<dyn ScoringFunction>) -> Self {
        Self { upstream, scorer }
    }
}

impl Stage for ScorerStage {
    fn kind(&self) -> StageKind {
        StageKind::Scorer
    }

    fn next(&mut self, ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
        loop {
            let status = self.upstream.next(ctx, out);
            if status != Status::Ok {
                return status;
            }

            let output = match self.scorer.score(out.index_result.as_ref(), out.dmd.as_ref(), ctx.min_score) {
                Ok(output) => output,
                Err(e) => {
                    ctx.record_error(PipelineError::Scorer(e));
                    return Status::Error;
                }
            };

            out.score = output.score;
            if output.explain.is_some() {
                out.score_explain = output.explain;
            }

            if out.score == FILTEROUT {
                ctx.total_results = ctx.total_results.saturating_sub(1);
                out.clear();
                continue;
            }

            return Status::Ok;
        }
    }
}
