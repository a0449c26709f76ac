//! Field loader stage.
//!
//! Passes through untouched for an absent or deleted document; otherwise
//! loads with `noSortables=true, forceString=true` and merges into
//! `rowdata`, ignoring (but optionally logging/surfacing) a load failure.

use std::sync::Arc;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::external::{LoadMode, LoadOptions, RLookupLoader};
use crate::result::SearchResult;
use crate::rlookup::{RLookup, RLookupKey};
use crate::stage::{Stage, StageKind, Status};

pub struct LoaderStage {
    upstream: Box<dyn Stage>,
    loader: Arc<dyn RLookupLoader>,
    lookup: Arc<RLookup>,
    /// Empty means `ALLKEYS` mode.
    keys: Vec<Arc<RLookupKey>>,
}

impl LoaderStage {
    pub fn new(
        upstream: Box<dyn Stage>,
        loader: Arc<dyn RLookupLoader>,
        lookup: Arc<RLookup>,
        keys: Vec<Arc<RLookupKey>>,
    ) -> Self {
        Self { upstream, loader, lookup, keys }
    }
}

impl Stage for LoaderStage {
    fn kind(&self) -> StageKind {
        StageKind::Loader
    }

    fn next(&mut self, ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
        let status = self.upstream.next(ctx, out);
        if status != Status::Ok {
            return status;
        }

        let Some(dmd) = out.dmd.clone() else {
            return Status::Ok;
        };
        if dmd.flags.contains(crate::document::DocFlags::DELETED) {
            return Status::Ok;
        }

        let mode = if self.keys.is_empty() { LoadMode::AllKeys } else { LoadMode::KeyList };
        let options =
            LoadOptions { dmd: &dmd, keys: &self.keys, mode, no_sortables: true, force_string: true };

        if let Err(e) = self.loader.load_document(&self.lookup, &mut out.rowdata, options) {
            tracing::debug!(doc_id = out.doc_id, error = %e, "field load failed, result still flows");
            if ctx.surface_load_errors {
                ctx.record_error(PipelineError::Load(e));
            }
        }

        Status::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Deadline, TimeoutPolicy};
    use crate::document::{DocFlags, DocumentMetadata};
    use crate::error::LoaderError;
    use crate::rlookup::{FieldValue, RLookupRow};

    struct OneShot(Option<crate::document::Dmd>);
    impl Stage for OneShot {
        fn kind(&self) -> StageKind {
            StageKind::Index
        }
        fn next(&mut self, _ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
            match self.0.take() {
                Some(dmd) => {
                    out.dmd = Some(dmd);
                    Status::Ok
                }
                None => Status::Eof,
            }
        }
    }

    struct AlwaysSetsTitle;
    impl RLookupLoader for AlwaysSetsTitle {
        fn load_document(
            &self,
            _lookup: &RLookup,
            row: &mut RLookupRow,
            options: LoadOptions,
        ) -> Result<(), LoaderError> {
            for key in options.keys {
                row.write_key(key, FieldValue::Str("loaded".into()));
            }
            Ok(())
        }
    }

    fn dmd(deleted: bool) -> crate::document::Dmd {
        Arc::new(DocumentMetadata {
            doc_id: 1,
            key: b"d"[..].into(),
            flags: if deleted { DocFlags::DELETED } else { DocFlags::NONE },
            sort_vector: None,
        })
    }

    #[test]
    fn loads_into_row_for_live_document() {
        crate::init_test_tracing();
        let mut lookup = RLookup::new();
        let title = lookup.declare("title", None);
        let lookup = Arc::new(lookup);

        let mut stage = LoaderStage::new(
            Box::new(OneShot(Some(dmd(false)))),
            Arc::new(AlwaysSetsTitle),
            lookup,
            vec![title.clone()],
        );
        let mut ctx = PipelineContext::new(Deadline::max(), TimeoutPolicy::Return);
        let mut out = SearchResult::default();

        assert_eq!(stage.next(&mut ctx, &mut out), Status::Ok);
        assert_eq!(out.rowdata.get_item(&title), Some(&FieldValue::Str("loaded".into())));
    }

    #[test]
    fn deleted_document_passes_through_unloaded() {
        let lookup = Arc::new(RLookup::new());
        let mut stage =
            LoaderStage::new(Box::new(OneShot(Some(dmd(true)))), Arc::new(AlwaysSetsTitle), lookup, vec![]);
        let mut ctx = PipelineContext::new(Deadline::max(), TimeoutPolicy::Return);
        let mut out = SearchResult::default();

        assert_eq!(stage.next(&mut ctx, &mut out), Status::Ok);
        assert!(!out.rowdata.has_dynamic_overlay());
    }
}
