// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Round-robin interleave table: a deterministic, server-balanced target
//! order used by the round-robin and offset-anchored policies.

use crate::error::{AllocError, AllocResult};
use crate::health::DirtyFlags;
use crate::target::{ServerId, TargetIdx, TargetTable};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Picks are re-randomized every
/// `max(RESEED_MIN / pool_count, 1) * RESEED_MULT * pool_count` picks to
/// avoid long-lived alias patterns between allocations.
const RESEED_MULT: u64 = 30;
const RESEED_MIN: u64 = 2000;

struct Interleave {
    /// `None` is the "empty" sentinel: a slot nothing was placed in
    /// because its owning server ran out of targets before the table
    /// filled. Distinct from "placed but currently unusable".
    order: Vec<Option<TargetIdx>>,
    current: bool,
}

impl Default for Interleave {
    fn default() -> Self {
        Self { order: Vec::new(), current: false }
    }
}

pub struct RrTable {
    table: Arc<TargetTable>,
    dirty: Arc<DirtyFlags>,
    interleave: RwLock<Interleave>,
    cursor_lock: Mutex<()>,
    start_idx: AtomicU64,
    offset_idx: AtomicU64,
    picks_since_reseed: AtomicU64,
}

impl RrTable {
    #[must_use]
    pub fn new(table: Arc<TargetTable>, dirty: Arc<DirtyFlags>) -> Self {
        Self {
            table,
            dirty,
            interleave: RwLock::new(Interleave::default()),
            cursor_lock: Mutex::new(()),
            start_idx: AtomicU64::new(0),
            offset_idx: AtomicU64::new(0),
            picks_since_reseed: AtomicU64::new(0),
        }
    }

    fn is_dirty(&self) -> bool {
        self.dirty.rr.load(Ordering::SeqCst) || !self.interleave.read().current
    }

    /// Rebuild the interleave order for `pool` if stale.
    pub fn ensure_current(&self, pool: &str) -> AllocResult<()> {
        if !self.is_dirty() {
            return Ok(());
        }

        let members = self
            .table
            .with_pool(pool, |p| p.members.clone())
            .ok_or_else(|| AllocError::NoSuchPool(pool.to_string()))?;
        let pool_count = members.len();
        if pool_count == 0 {
            let mut state = self.interleave.write();
            state.order.clear();
            state.current = true;
            return Ok(());
        }

        let mut per_server: Vec<(ServerId, Vec<TargetIdx>)> = Vec::new();
        for &idx in &members {
            let server = self.table.with_target(idx, |t| t.server).unwrap_or(0);
            match per_server.iter_mut().find(|(s, _)| *s == server) {
                Some((_, v)) => v.push(idx),
                None => per_server.push((server, vec![idx])),
            }
        }
        per_server.sort_by_key(|(s, _)| *s);

        let mut order: Vec<Option<TargetIdx>> = vec![None; pool_count];
        let mut placed = 0usize;
        for (_server, targets) in &per_server {
            let server_count = targets.len() as u64;
            for (j, &t) in targets.iter().enumerate() {
                let next = (j as u64 * pool_count as u64 / server_count) as usize % pool_count;
                let mut pos = next;
                let mut probes = 0;
                while order[pos].is_some() && probes < pool_count {
                    pos = (pos + 1) % pool_count;
                    probes += 1;
                }
                if order[pos].is_none() {
                    order[pos] = Some(t);
                    placed += 1;
                }
            }
        }

        if placed != pool_count {
            self.dirty.rr.store(true, Ordering::SeqCst);
            log::warn!(
                "rr table rebuild for pool '{}' placed {}/{} targets, retrying next call",
                pool, placed, pool_count
            );
            return Err(AllocError::TryAgain);
        }

        let mut state = self.interleave.write();
        state.order = order;
        state.current = true;
        self.dirty.rr.store(false, Ordering::SeqCst);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interleave.read().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<TargetIdx> {
        let state = self.interleave.read();
        if state.order.is_empty() {
            return None;
        }
        state.order[position % state.order.len()]
    }

    /// Advance the shared cursor by one and return the position to read.
    /// Reseeds to a fresh random start once the configured pick budget
    /// is exhausted.
    pub fn advance(&self) -> usize {
        let _guard = self.cursor_lock.lock();
        let pool_count = self.len().max(1) as u64;
        let reseed_period = (RESEED_MIN / pool_count).max(1) * RESEED_MULT * pool_count;

        let picks = self.picks_since_reseed.fetch_add(1, Ordering::SeqCst) + 1;
        if picks >= reseed_period {
            let mut rng = rand::rng();
            let fresh = rng.random_range(0..pool_count);
            self.start_idx.store(fresh, Ordering::SeqCst);
            self.picks_since_reseed.store(0, Ordering::SeqCst);
            return fresh as usize;
        }

        let prev = self.start_idx.fetch_add(1, Ordering::SeqCst);
        let wrapped = (prev + 1) >= pool_count;
        if wrapped {
            self.start_idx.store(0, Ordering::SeqCst);
            self.offset_idx.fetch_add(1, Ordering::SeqCst);
        }
        (prev % pool_count) as usize
    }

    #[must_use]
    pub fn offset_idx(&self) -> u64 {
        self.offset_idx.load(Ordering::SeqCst)
    }
}
