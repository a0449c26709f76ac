//! Metrics-to-row copy stage.
//!
//! Copies every `(key, value)` pair out of `indexResult.metrics` into
//! `rowdata` via the row's write-key operation. Pass-through otherwise.

use crate::context::PipelineContext;
use crate::result::SearchResult;
use crate::stage::{Stage, StageKind, Status};

pub struct MetricsStage {
    upstream: Box<dyn Stage>,
}

impl MetricsStage {
    pub fn new(upstream: Box<dyn Stage>) -> Self {
        Self { upstream }
    }
}

impl Stage for MetricsStage {
    fn kind(&self) -> StageKind {
        StageKind::Metrics
    }

    fn next(&mut self, ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
        let status = self.upstream.next(ctx, out);
        if status != Status::Ok {
            return status;
        }
        if let Some(ir) = &out.index_result {
            if !ir.metrics.is_empty() {
                let metrics = ir.metrics.clone();
                for (key, value) in metrics {
                    out.rowdata.write_key(&key, value);
                }
            }
        }
        Status::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Deadline, TimeoutPolicy};
    use crate::external::IndexResult;
    use crate::rlookup::{FieldValue, RLookup};

    struct OneShot(Option<IndexResult>);
    impl Stage for OneShot {
        fn kind(&self) -> StageKind {
            StageKind::Index
        }
        fn next(&mut self, _ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
            match self.0.take() {
                Some(ir) => {
                    out.index_result = Some(ir);
                    Status::Ok
                }
                None => Status::Eof,
            }
        }
    }

    #[test]
    fn copies_metrics_into_row() {
        let mut lookup = RLookup::new();
        let bm25 = lookup.declare("bm25", None);

        let ir = IndexResult { doc_id: 1, metrics: vec![(bm25.clone(), FieldValue::Double(3.2))] };
        let mut stage = MetricsStage::new(Box::new(OneShot(Some(ir))));
        let mut ctx = PipelineContext::new(Deadline::max(), TimeoutPolicy::Return);
        let mut out = SearchResult::default();

        assert_eq!(stage.next(&mut ctx, &mut out), Status::Ok);
        assert_eq!(out.rowdata.get_item(&bm25), Some(&FieldValue::Double(3.2)));
    }
}
