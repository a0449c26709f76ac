//! Per-query shared state threaded through every stage.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::PipelineError;

/// The one config value the core reads, threaded in at construction rather
/// than read from global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Treat a deadline hit as `EOF`; yield whatever was accumulated.
    Return,
    /// Propagate `TIMEDOUT` and discard accumulated state.
    Fail,
}

/// A query's absolute deadline, sampled by the source stage on a counter
/// rather than on every pull.
#[derive(Debug, Clone)]
pub struct Deadline {
    started_at: Instant,
    budget: Duration,
    #[cfg(test)]
    stop_after: Option<Rc<Cell<usize>>>,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            budget,
            #[cfg(test)]
            stop_after: None,
        }
    }

    /// A deadline that will not be hit in practice.
    pub fn max() -> Self {
        Self::new(Duration::from_secs(u64::MAX / 2))
    }

    /// A deadline that is already exceeded, modeling a client cancellation
    /// that sets the deadline to now.
    pub fn expired() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Test-only: force `exceeded()` to return true starting on the Nth call,
    /// so timeout-path tests are deterministic instead of racing the clock.
    #[cfg(test)]
    pub fn with_stop_after(self, n: usize) -> Self {
        Self { stop_after: Some(Rc::new(Cell::new(n))), ..self }
    }

    pub fn exceeded(&self) -> bool {
        #[cfg(test)]
        if let Some(counter) = &self.stop_after {
            let remaining = counter.get();
            if remaining == 0 {
                return true;
            }
            counter.set(remaining - 1);
            return false;
        }
        self.started_at.elapsed() >= self.budget
    }
}

/// Per-query shared state threaded through every stage's `next`.
pub struct PipelineContext {
    pub total_results: u64,
    pub min_score: f64,
    pub deadline: Deadline,
    pub timeout_policy: TimeoutPolicy,
    pub err: Option<PipelineError>,
    /// Opt-in surfacing of per-document field load failures onto `err`
    /// (default off, preserving silent behavior).
    pub surface_load_errors: bool,
}

impl PipelineContext {
    pub fn new(deadline: Deadline, timeout_policy: TimeoutPolicy) -> Self {
        Self {
            total_results: 0,
            min_score: f64::NEG_INFINITY,
            deadline,
            timeout_policy,
            err: None,
            surface_load_errors: false,
        }
    }

    /// First error wins.
    pub fn record_error(&mut self, err: PipelineError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }
}
