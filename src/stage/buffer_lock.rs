//! Buffer-and-lock / Unlocker.
//!
//! Avoids acquiring the index read lock and the keyspace mutex in opposite
//! order from a writer holding the mutex and waiting on the index lock:
//! drain upstream fully while still holding the index lock, then hand off to
//! the keyspace mutex, dropping the index lock first if the non-blocking
//! acquire fails. A version bump across that handoff switches the yield to a
//! validating variant that re-checks each buffered result's deleted flag.

use std::sync::Arc;

use crate::context::{PipelineContext, TimeoutPolicy};
use crate::document::DocFlags;
use crate::external::{IndexLock, KeyspaceMutex, LockStatus};
use crate::result::SearchResult;
use crate::stage::{Stage, StageKind, Status};

enum BufferPhase {
    Draining,
    YieldPlain,
    YieldValidating,
}

pub struct BufferAndLockStage {
    upstream: Box<dyn Stage>,
    phase: BufferPhase,
    buffer: Vec<SearchResult>,
    pos: usize,
    keyspace: Arc<dyn KeyspaceMutex>,
    index_lock: Arc<dyn IndexLock>,
}

impl BufferAndLockStage {
    pub fn new(upstream: Box<dyn Stage>, keyspace: Arc<dyn KeyspaceMutex>, index_lock: Arc<dyn IndexLock>) -> Self {
        Self { upstream, phase: BufferPhase::Draining, buffer: Vec::new(), pos: 0, keyspace, index_lock }
    }

    /// Phase A (drain) and Phase B (GIL handoff). Returns `Some(status)` only
    /// when upstream produced something other than `EOF`/partial-`TIMEDOUT`,
    /// in which case draining aborts and that status propagates directly.
    fn drain_and_handoff(&mut self, ctx: &mut PipelineContext) -> Option<Status> {
        let recorded_version = self.index_lock.current_version();
        loop {
            let mut candidate = SearchResult::default();
            match self.upstream.next(ctx, &mut candidate) {
                Status::Ok => self.buffer.push(candidate),
                Status::Eof => break,
                Status::Timedout if ctx.timeout_policy == TimeoutPolicy::Return => break,
                other => return Some(other),
            }
        }

        match self.keyspace.try_lock() {
            LockStatus::Ok => {
                self.phase = BufferPhase::YieldPlain;
            }
            LockStatus::Busy => {
                tracing::debug!("keyspace mutex busy, releasing index lock to block on it");
                self.index_lock.unlock_spec();
                self.keyspace.lock();
                let current = self.index_lock.current_version();
                if current != recorded_version {
                    tracing::debug!(recorded_version, current, "index mutated during GIL handoff, validating yield");
                    self.phase = BufferPhase::YieldValidating;
                } else {
                    self.phase = BufferPhase::YieldPlain;
                }
            }
        }
        None
    }

    /// Phase C. The validating variant additionally skips deleted documents.
    fn yield_step(&mut self, out: &mut SearchResult) -> Status {
        loop {
            if self.pos >= self.buffer.len() {
                return Status::Eof;
            }
            let candidate = std::mem::take(&mut self.buffer[self.pos]);
            self.pos += 1;

            if matches!(self.phase, BufferPhase::YieldValidating) {
                if let Some(dmd) = &candidate.dmd {
                    if dmd.flags.contains(DocFlags::DELETED) {
                        continue;
                    }
                }
            }
            *out = candidate;
            return Status::Ok;
        }
    }
}

impl Stage for BufferAndLockStage {
    fn kind(&self) -> StageKind {
        StageKind::BufferLock
    }

    #[tracing::instrument(level = "trace", skip_all, target = "pipeline::buffer_lock")]
    fn next(&mut self, ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
        if matches!(self.phase, BufferPhase::Draining) {
            if let Some(status) = self.drain_and_handoff(ctx) {
                return status;
            }
        }
        self.yield_step(out)
    }
}

/// Releases the keyspace mutex on `EOF`, or via [`Drop`] if the query is
/// torn down mid-yield instead, exactly once either way.
pub struct UnlockerStage {
    upstream: Box<dyn Stage>,
    keyspace: Arc<dyn KeyspaceMutex>,
    unlocked: bool,
}

impl UnlockerStage {
    pub fn new(upstream: Box<dyn Stage>, keyspace: Arc<dyn KeyspaceMutex>) -> Self {
        Self { upstream, keyspace, unlocked: false }
    }

    fn unlock_once(&mut self) {
        if !self.unlocked {
            self.keyspace.unlock();
            self.unlocked = true;
        }
    }
}

impl Stage for UnlockerStage {
    fn kind(&self) -> StageKind {
        StageKind::Unlocker
    }

    fn next(&mut self, ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
        let status = self.upstream.next(ctx, out);
        if status != Status::Ok {
            self.unlock_once();
        }
        status
    }
}

impl Drop for UnlockerStage {
    fn drop(&mut self) {
        self.unlock_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Deadline;
    use crate::document::DocumentMetadata;
    use std::cell::Cell;

    struct VecStage(std::vec::IntoIter<(u64, bool)>);
    impl Stage for VecStage {
        fn kind(&self) -> StageKind {
            StageKind::Loader
        }
        fn next(&mut self, _ctx: &mut PipelineContext, out: &mut SearchResult) -> Status {
            match self.0.next() {
                Some((id, deleted)) => {
                    out.doc_id = id;
                    out.dmd = Some(Arc::new(DocumentMetadata {
                        doc_id: id,
                        key: format!("d{id}").into_bytes().into_boxed_slice(),
                        flags: if deleted { DocFlags::DELETED } else { DocFlags::NONE },
                        sort_vector: None,
                    }));
                    Status::Ok
                }
                None => Status::Eof,
            }
        }
    }

    struct FakeKeyspace {
        busy_once: Cell<bool>,
        locked: Cell<bool>,
        unlocks: Cell<u32>,
    }
    impl KeyspaceMutex for FakeKeyspace {
        fn try_lock(&self) -> LockStatus {
            if self.busy_once.get() {
                self.busy_once.set(false);
                LockStatus::Busy
            } else {
                self.locked.set(true);
                LockStatus::Ok
            }
        }
        fn lock(&self) {
            self.locked.set(true);
        }
        fn unlock(&self) {
            self.locked.set(false);
            self.unlocks.set(self.unlocks.get() + 1);
        }
    }

    /// Reports `1` on its first call (the drain-time recording) and `2` on
    /// every call after, standing in for a writer's version bump that lands
    /// during the real handoff's blocking GIL acquire.
    struct FakeIndexLock {
        read_once: Cell<bool>,
        unlock_spec_calls: Cell<u32>,
    }
    impl IndexLock for FakeIndexLock {
        fn unlock_spec(&self) {
            self.unlock_spec_calls.set(self.unlock_spec_calls.get() + 1);
        }
        fn current_version(&self) -> u64 {
            if self.read_once.replace(true) {
                2
            } else {
                1
            }
        }
    }

    #[test]
    fn unchanged_version_yields_buffer_in_order() {
        let upstream = VecStage(vec![(1, false), (2, false), (3, false)].into_iter());
        let keyspace = Arc::new(FakeKeyspace { busy_once: Cell::new(false), locked: Cell::new(false), unlocks: Cell::new(0) });
        let index_lock = Arc::new(FakeIndexLock { read_once: Cell::new(false), unlock_spec_calls: Cell::new(0) });
        let mut stage = BufferAndLockStage::new(Box::new(upstream), keyspace, index_lock);
        let mut ctx = PipelineContext::new(Deadline::max(), TimeoutPolicy::Return);

        let mut ids = Vec::new();
        loop {
            let mut out = SearchResult::default();
            match stage.next(&mut ctx, &mut out) {
                Status::Ok => ids.push(out.doc_id),
                Status::Eof => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn version_change_during_handoff_skips_deleted() {
        crate::init_test_tracing();
        let upstream = VecStage(vec![(1, false), (2, true), (3, false)].into_iter());
        // busy_once=true forces the fallback-to-blocking path, which is the
        // only path that re-reads the index version after recording it.
        let keyspace = Arc::new(FakeKeyspace { busy_once: Cell::new(true), locked: Cell::new(false), unlocks: Cell::new(0) });
        let index_lock = Arc::new(FakeIndexLock { read_once: Cell::new(false), unlock_spec_calls: Cell::new(0) });
        let mut stage = BufferAndLockStage::new(Box::new(upstream), keyspace, index_lock.clone());
        let mut ctx = PipelineContext::new(Deadline::max(), TimeoutPolicy::Return);

        let mut ids = Vec::new();
        loop {
            let mut out = SearchResult::default();
            match stage.next(&mut ctx, &mut out) {
                Status::Ok => ids.push(out.doc_id),
                Status::Eof => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(index_lock.unlock_spec_calls.get(), 1);
    }

    #[test]
    fn unlocker_releases_exactly_once_on_eof() {
        let upstream = VecStage(vec![(1, false)].into_iter());
        let keyspace = Arc::new(FakeKeyspace { busy_once: Cell::new(false), locked: Cell::new(true), unlocks: Cell::new(0) });
        let mut stage = UnlockerStage::new(Box::new(upstream), keyspace.clone());
        let mut ctx = PipelineContext::new(Deadline::max(), TimeoutPolicy::Return);

        let mut out = SearchResult::default();
        assert_eq!(stage.next(&mut ctx, &mut out), Status::Ok);
        assert_eq!(stage.next(&mut ctx, &mut out), Status::Eof);
        assert_eq!(stage.next(&mut ctx, &mut out), Status::Eof);
        assert_eq!(keyspace.unlocks.get(), 1);
    }

    #[test]
    fn unlocker_releases_on_drop_if_never_reached_eof() {
        let upstream = VecStage(vec![(1, false), (2, false)].into_iter());
        let keyspace = Arc::new(FakeKeyspace { busy_once: Cell::new(false), locked: Cell::new(true), unlocks: Cell::new(0) });
        {
            let mut stage = UnlockerStage::new(Box::new(upstream), keyspace.clone());
            let mut ctx = PipelineContext::new(Deadline::max(), TimeoutPolicy::Return);
            let mut out = SearchResult::default();
            assert_eq!(stage.next(&mut ctx, &mut out), Status::Ok);
        }
        assert_eq!(keyspace.unlocks.get(), 1);
    }
}
