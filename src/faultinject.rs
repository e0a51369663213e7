// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fail-injection hook used by test scenarios: force a specific target to
//! be skipped on the first iteration of a placement loop. Isolated
//! behind the `faultinject` feature so production builds compile it out
//! entirely.

#[cfg(feature = "faultinject")]
mod enabled {
    use crate::target::TargetIdx;
    use std::sync::atomic::{AtomicI64, Ordering};

    static SKIP_AT_ITERATION_ZERO: AtomicI64 = AtomicI64::new(-1);

    pub fn set_skip_target(target: Option<TargetIdx>) {
        SKIP_AT_ITERATION_ZERO.store(target.map_or(-1, i64::from), Ordering::SeqCst);
    }

    #[must_use]
    pub fn should_skip(target: TargetIdx, iteration: usize) -> bool {
        iteration == 0 && SKIP_AT_ITERATION_ZERO.load(Ordering::SeqCst) == i64::from(target)
    }
}

#[cfg(feature = "faultinject")]
pub use enabled::{set_skip_target, should_skip};

#[cfg(not(feature = "faultinject"))]
#[must_use]
pub fn should_skip(_target: crate::target::TargetIdx, _iteration: usize) -> bool {
    false
}

#[cfg(all(test, feature = "faultinject"))]
mod tests {
    use super::*;

    #[test]
    fn skip_only_applies_at_iteration_zero() {
        set_skip_target(Some(3));
        assert!(should_skip(3, 0));
        assert!(!should_skip(3, 1));
        assert!(!should_skip(4, 0));
        set_skip_target(None);
    }
}
