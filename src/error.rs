//! Error taxonomy for the pipeline.
//!
//! Per-document defects (missing/deleted documents, a single failed field
//! load) are not represented here; they are swallowed at the stage that
//! encounters them and never reach [`PipelineError`]. Only plugin failures
//! and pipeline-internal faults are fail-fast.

use thiserror::Error;

/// Error surfaced by a stage's `next`, via `Status::Error`, and readable back
/// from `PipelineContext::err` after a drain. The context records the first
/// one to occur; later errors are dropped.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("query exceeded its deadline")]
    TimedOut,
    #[error(transparent)]
    Scorer(#[from] ScorerError),
    #[error(transparent)]
    Load(#[from] LoaderError),
}

/// Raised by a [`crate::external::ScoringFunction`] implementation.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct ScorerError(pub String);

/// Raised by a [`crate::external::RLookupLoader`] implementation.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct LoaderError(pub String);
