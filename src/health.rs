// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Target health cache: periodic statfs sweep with a staleness window.
//!
//! A single winner performs the sweep under the write side of the QoS
//! lock; everyone else's `refresh_if_stale` call is a cheap no-op once
//! the epoch is current. Mirrors the double-checked-locking shape used
//! for cache invalidation elsewhere in this codebase's interop layer.

use crate::backend::Backend;
use crate::config::AllocatorConfig;
use crate::target::{TargetIdx, TargetTable};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared dirty bits flipped by health transitions. [`crate::rr::RrTable`]
/// and [`crate::weight::WeightModel`] each hold a clone of the same
/// `Arc<DirtyFlags>` so a single active/inactive transition invalidates
/// both the RR table and the weight model atomically.
#[derive(Debug, Default)]
pub struct DirtyFlags {
    pub rr: AtomicBool,
    pub qos: AtomicBool,
}

impl DirtyFlags {
    #[must_use]
    pub fn new_dirty() -> Arc<Self> {
        Arc::new(Self {
            rr: AtomicBool::new(true),
            qos: AtomicBool::new(true),
        })
    }

    pub fn mark_all(&self) {
        self.rr.store(true, Ordering::SeqCst);
        self.qos.store(true, Ordering::SeqCst);
    }
}

/// Outcome of probing a single target, normalized per the fixed priority
/// order: full space/inode exhaustion beats read-only beats
/// no-precreate beats disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    Full,
    ReadOnly,
    NoPrecreate,
    Disconnected,
}

pub struct TargetHealthCache {
    table: Arc<TargetTable>,
    backend: Arc<dyn Backend>,
    config: AllocatorConfig,
    dirty: Arc<DirtyFlags>,
    sweep_lock: RwLock<()>,
    epoch_millis: AtomicU64,
    swept: AtomicBool,
    start: Instant,
}

impl TargetHealthCache {
    #[must_use]
    pub fn new(table: Arc<TargetTable>, backend: Arc<dyn Backend>, config: AllocatorConfig, dirty: Arc<DirtyFlags>) -> Self {
        Self {
            table,
            backend,
            config,
            dirty,
            sweep_lock: RwLock::new(()),
            epoch_millis: AtomicU64::new(0),
            swept: AtomicBool::new(false),
            start: Instant::now(),
        }
    }

    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Sweep all known targets if the cached epoch is older than
    /// `2 * max_age`, or if no sweep has ever run. The latter case
    /// matters because `epoch_millis` starts at 0 alongside a fresh
    /// `start`, so the naive staleness check would read as "current"
    /// on the very first call and leave every descriptor at its
    /// all-zero default forever.
    pub fn refresh_if_stale(&self, max_age: Duration) {
        let window = max_age.saturating_mul(2).as_millis() as u64;
        let now = self.now_millis();
        if self.swept.load(Ordering::Acquire) && now.saturating_sub(self.epoch_millis.load(Ordering::Acquire)) < window {
            return;
        }

        let _write = self.sweep_lock.write();
        // Double-check: another thread may have just finished the sweep.
        let now = self.now_millis();
        if self.swept.load(Ordering::Acquire) && now.saturating_sub(self.epoch_millis.load(Ordering::Acquire)) < window {
            return;
        }

        for idx in self.table.target_indices() {
            self.probe(idx);
        }
        self.epoch_millis.store(now, Ordering::Release);
        self.swept.store(true, Ordering::Release);
    }

    /// Probe a single target and fold the result into its descriptor.
    /// Returns the normalized outcome.
    pub fn probe(&self, idx: TargetIdx) -> ProbeOutcome {
        let overrides = self.config.overrides_for(idx);
        let result = self.backend.statfs(idx);

        let outcome = match &result {
            Err(_) => ProbeOutcome::Disconnected,
            Ok(r) => {
                if r.state.enospc || (r.state.enoino && r.stat.fprecreated == 0) {
                    ProbeOutcome::Full
                } else if r.state.readonly {
                    ProbeOutcome::ReadOnly
                } else if r.state.noprecreate {
                    ProbeOutcome::NoPrecreate
                } else if !r.connected {
                    ProbeOutcome::Disconnected
                } else {
                    ProbeOutcome::Ok
                }
            }
        };

        let was_active = self.table.with_target(idx, |t| t.active).unwrap_or(false);
        self.table.with_target_mut(idx, |t| {
            if let Ok(r) = result {
                t.stat = r.stat;
                t.state = r.state;
                t.state.degraded = t.state.degraded || overrides.degraded;
                t.state.noprecreate = t.state.noprecreate || overrides.noprecreate;
            }
            t.connecting = matches!(outcome, ProbeOutcome::Disconnected);
            t.active = !matches!(outcome, ProbeOutcome::Disconnected);
        });
        let is_active = self.table.with_target(idx, |t| t.active).unwrap_or(false);

        if was_active != is_active {
            self.dirty.mark_all();
            log::debug!(
                "target {} transitioned active={} -> active={} (probe={:?})",
                idx, was_active, is_active, outcome
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::FakeBackend;
    use crate::backend::StatfsResult;
    use crate::target::{TargetState, TargetStat};

    fn make_cache() -> (Arc<TargetTable>, Arc<FakeBackend>, TargetHealthCache) {
        let table = Arc::new(TargetTable::new());
        table.add_target(0, 1);
        table.add_target(1, 1);
        let backend = Arc::new(FakeBackend::new());
        let dirty = DirtyFlags::new_dirty();
        let cache = TargetHealthCache::new(table.clone(), backend.clone(), AllocatorConfig::new(), dirty);
        (table, backend, cache)
    }

    #[test]
    fn probe_ok_keeps_target_active() {
        let (table, backend, cache) = make_cache();
        backend.set(0, StatfsResult {
            stat: TargetStat { blocks_avail: 100, blocks_total: 100, block_size: 4096, fprecreated: 10 },
            state: TargetState::default(),
            connected: true,
        });
        let outcome = cache.probe(0);
        assert_eq!(outcome, ProbeOutcome::Ok);
        assert!(table.with_target(0, |t| t.active).unwrap());
    }

    #[test]
    fn probe_enospc_marks_full_but_stays_active() {
        let (table, backend, cache) = make_cache();
        backend.set(0, StatfsResult {
            stat: TargetStat::default(),
            state: TargetState { enospc: true, ..Default::default() },
            connected: true,
        });
        let outcome = cache.probe(0);
        assert_eq!(outcome, ProbeOutcome::Full);
        assert!(table.with_target(0, |t| t.active).unwrap());
    }

    #[test]
    fn probe_disconnect_flips_active_and_marks_dirty() {
        let (table, _backend, cache) = make_cache();
        // target 1 has no statfs entry registered -> backend errors -> disconnected.
        let outcome = cache.probe(1);
        assert_eq!(outcome, ProbeOutcome::Disconnected);
        assert!(!table.with_target(1, |t| t.active).unwrap());
        assert!(table.with_target(1, |t| t.connecting).unwrap());
    }

    #[test]
    fn refresh_if_stale_always_sweeps_on_first_call() {
        let (table, backend, cache) = make_cache();
        backend.set(0, StatfsResult {
            stat: TargetStat { blocks_avail: 1, blocks_total: 1, block_size: 4096, fprecreated: 1 },
            state: TargetState::default(),
            connected: true,
        });
        // target 1 is left unregistered so its probe reports disconnected;
        // the point of this test is only that a probe ran at all.
        cache.refresh_if_stale(Duration::from_secs(60));
        assert!(table.with_target(0, |t| t.stat.blocks_avail).unwrap() == 1);
        assert!(!table.with_target(1, |t| t.active).unwrap());
    }

    #[test]
    fn refresh_if_stale_is_noop_within_window() {
        let (_table, backend, cache) = make_cache();
        backend.set(0, StatfsResult {
            stat: TargetStat::default(),
            state: TargetState::default(),
            connected: true,
        });
        backend.set(1, StatfsResult {
            stat: TargetStat::default(),
            state: TargetState::default(),
            connected: true,
        });
        cache.refresh_if_stale(Duration::from_secs(60));
        let epoch_after_first = cache.epoch_millis.load(Ordering::Acquire);
        cache.refresh_if_stale(Duration::from_secs(60));
        assert_eq!(epoch_after_first, cache.epoch_millis.load(Ordering::Acquire));
    }
}
