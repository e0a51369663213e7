// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS weight model: per-target/per-server weights derived from free
//! space, with a decaying penalty that discourages repeated picks of the
//! same target or server within a short window.

use crate::health::DirtyFlags;
use crate::target::{ServerId, TargetIdx, TargetTable};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Penalty applied to a target/server immediately after it is picked,
/// as a fraction of its weight. Decays back toward zero on each
/// `recompute`.
const PICK_PENALTY: f64 = 0.25;
/// Per-refresh decay factor: `penalty *= DECAY` each recompute.
const DECAY: f64 = 0.5;

#[derive(Default, Clone, Copy)]
struct TargetWeight {
    base: u64,
    adjusted: u64,
    penalty: f64,
    usable: bool,
}

struct State {
    targets: HashMap<TargetIdx, TargetWeight>,
    server_penalty: HashMap<ServerId, f64>,
    total_weight: u64,
    current: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            targets: HashMap::new(),
            server_penalty: HashMap::new(),
            total_weight: 0,
            current: false,
        }
    }
}

pub struct WeightModel {
    table: Arc<TargetTable>,
    dirty: Arc<DirtyFlags>,
    state: RwLock<State>,
}

impl WeightModel {
    #[must_use]
    pub fn new(table: Arc<TargetTable>, dirty: Arc<DirtyFlags>) -> Self {
        Self { table, dirty, state: RwLock::new(State::default()) }
    }

    fn is_dirty(&self) -> bool {
        self.dirty.qos.load(Ordering::SeqCst) || !self.state.read().current
    }

    /// Recompute base weights, decay existing penalties, and mark every
    /// healthy, non-degraded target usable. Must be called before
    /// `usable()` or `pick`.
    pub fn recompute(&self, pool_members: &[TargetIdx]) {
        if !self.is_dirty() {
            return;
        }

        let mut server_base: HashMap<ServerId, u64> = HashMap::new();
        let mut per_target: HashMap<TargetIdx, (ServerId, u64, bool)> = HashMap::new();
        for &idx in pool_members {
            let Some((server, free, usable)) = self.table.with_target(idx, |t| {
                let usable = t.active && !t.state.enospc && !t.state.readonly
                    && !t.state.noprecreate && !t.state.degraded;
                (t.server, t.stat.free_bytes(), usable)
            }) else {
                continue;
            };
            per_target.insert(idx, (server, free, usable));
            if usable {
                *server_base.entry(server).or_insert(0) += free;
            }
        }

        let mut state = self.state.write();
        let mut total = 0u64;
        let mut targets = HashMap::with_capacity(per_target.len());
        for (idx, (server, free, usable)) in per_target {
            let prev_penalty = state.targets.get(&idx).map(|w| w.penalty * DECAY).unwrap_or(0.0);
            let server_penalty = state.server_penalty.get(&server).copied().unwrap_or(0.0) * DECAY;
            let server_total = (*server_base.get(&server).unwrap_or(&0)).max(1);
            let adjusted = if usable {
                let factor = (1.0 - prev_penalty).max(0.0) * (1.0 - server_penalty / server_total as f64).max(0.0);
                ((free as f64) * factor) as u64
            } else {
                0
            };
            total += adjusted;
            targets.insert(idx, TargetWeight { base: free, adjusted, penalty: prev_penalty, usable });
        }

        let mut server_penalty = HashMap::new();
        for (server, _) in server_base {
            let decayed = state.server_penalty.get(&server).copied().unwrap_or(0.0) * DECAY;
            server_penalty.insert(server, decayed);
        }

        state.targets = targets;
        state.server_penalty = server_penalty;
        state.total_weight = total;
        state.current = true;
        self.dirty.qos.store(false, Ordering::SeqCst);
    }

    /// QoS is only worth running when free space is meaningfully skewed
    /// across at least two servers; otherwise RR already balances fine.
    #[must_use]
    pub fn usable(&self) -> bool {
        let state = self.state.read();
        let usable_count = state.targets.values().filter(|w| w.usable).count();
        if usable_count < 2 {
            return false;
        }
        let values: Vec<f64> = state.targets.values().filter(|w| w.usable).map(|w| w.base as f64).collect();
        if values.len() < 2 {
            return false;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        if mean <= 0.0 {
            return false;
        }
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        let cv = variance.sqrt() / mean;
        cv > 0.05
    }

    #[must_use]
    pub fn good_target_count(&self) -> usize {
        self.state.read().targets.values().filter(|w| w.usable).count()
    }

    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.state.read().total_weight
    }

    /// Draw one target weighted by its adjusted weight, skipping any for
    /// which `avoid` returns true. Applies a one-shot pick penalty and
    /// removes the target from the pool of future draws in this round.
    pub fn pick(&self, avoid: impl Fn(TargetIdx) -> bool) -> Option<TargetIdx> {
        let mut state = self.state.write();
        if state.total_weight == 0 {
            return None;
        }

        let eligible: Vec<(TargetIdx, u64)> = state
            .targets
            .iter()
            .filter(|(idx, w)| w.usable && w.adjusted > 0 && !avoid(**idx))
            .map(|(idx, w)| (*idx, w.adjusted))
            .collect();
        let eligible_total: u64 = eligible.iter().map(|(_, w)| *w).sum();
        if eligible_total == 0 {
            return None;
        }

        let mut rng = rand::rng();
        let r = rng.random_range(0..eligible_total);
        let mut cur = 0u64;
        let mut chosen = None;
        for (idx, w) in &eligible {
            cur += *w;
            if cur > r {
                chosen = Some(*idx);
                break;
            }
        }
        let idx = chosen?;

        let server = self.table.with_target(idx, |t| t.server).unwrap_or(0);
        let picked_weight = state.targets.get(&idx).map(|w| w.adjusted).unwrap_or(0);
        state.total_weight = state.total_weight.saturating_sub(picked_weight);
        if let Some(w) = state.targets.get_mut(&idx) {
            w.usable = false;
            w.adjusted = 0;
            w.penalty = (w.penalty + PICK_PENALTY).min(1.0);
        }
        let server_penalty = state.server_penalty.entry(server).or_insert(0.0);
        *server_penalty = (*server_penalty + PICK_PENALTY).min(1.0);

        Some(idx)
    }

    pub fn decay_tick(&self, _max_age: Duration) {
        self.dirty.qos.store(true, Ordering::SeqCst);
    }
}
