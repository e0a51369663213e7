// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backend contract: the allocator is transport-agnostic. Callers supply
//! an implementation of [`Backend`] that knows how to reach targets.

use crate::error::AllocResult;
use crate::target::{TargetIdx, TargetState, TargetStat};

/// Result of a statfs probe against one target.
#[derive(Debug, Clone, Copy)]
pub struct StatfsResult {
    pub stat: TargetStat,
    pub state: TargetState,
    /// `true` if the transport reports the target as reachable.
    pub connected: bool,
}

/// An opaque handle to a reserved (declared, uncommitted) object on a
/// target. Dropping it without committing is the caller's concern; the
/// allocator only tracks which handles belong to which reservation.
#[derive(Debug)]
pub struct ObjectHandle {
    pub target: TargetIdx,
    pub token: u64,
}

/// Transport and object-precreation surface the allocator depends on.
///
/// Implementations are expected to be cheap to clone (e.g. an `Arc` over
/// a connection pool) since the orchestrator calls through this trait
/// once per target per allocation.
pub trait Backend: Send + Sync {
    /// Fetch current statfs + state for one target.
    fn statfs(&self, target: TargetIdx) -> AllocResult<StatfsResult>;

    /// Declare (reserve) a new object on `target`. This is a reservation
    /// only; commit/abort of the enclosing transaction is the caller's
    /// responsibility.
    fn declare_create(&self, target: TargetIdx) -> AllocResult<ObjectHandle>;

    /// Release a previously declared object without committing it.
    /// Called by the orchestrator during rollback.
    fn release(&self, handle: ObjectHandle) {
        let _ = handle;
    }
}

/// In-memory [`Backend`] double shared by this crate's unit tests, its
/// integration tests under `tests/`, and its benchmarks — kept
/// unconditionally compiled (not `#[cfg(test)]`) since those are
/// separate compilation units that cannot see a test-only item in the
/// library crate.
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory backend used by unit and integration tests: statfs and
    /// connectivity per target are set up ahead of time, declare_create
    /// always succeeds unless the target is marked failing.
    pub struct FakeBackend {
        pub targets: Mutex<HashMap<TargetIdx, StatfsResult>>,
        pub fail: Mutex<HashMap<TargetIdx, crate::error::AllocError>>,
        pub next_token: Mutex<u64>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self {
                targets: Mutex::new(HashMap::new()),
                fail: Mutex::new(HashMap::new()),
                next_token: Mutex::new(0),
            }
        }

        pub fn set(&self, target: TargetIdx, result: StatfsResult) {
            self.targets.lock().insert(target, result);
        }

        pub fn fail_declare(&self, target: TargetIdx, err: crate::error::AllocError) {
            self.fail.lock().insert(target, err);
        }
    }

    impl Backend for FakeBackend {
        fn statfs(&self, target: TargetIdx) -> AllocResult<StatfsResult> {
            self.targets
                .lock()
                .get(&target)
                .copied()
                .ok_or(crate::error::AllocError::NoSuchDevice(target))
        }

        fn declare_create(&self, target: TargetIdx) -> AllocResult<ObjectHandle> {
            if let Some(_err) = self.fail.lock().get(&target) {
                return Err(crate::error::AllocError::Full(target));
            }
            let mut tok = self.next_token.lock();
            *tok += 1;
            Ok(ObjectHandle { target, token: *tok })
        }
    }
}
