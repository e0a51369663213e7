// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Target (OST) and server (OSS) descriptors, and the pool registry.
//!
//! Targets are addressed by a dense `u32` index for the lifetime of the
//! process; servers by a `u32` id. Both are assigned by whatever external
//! component owns target-add/target-remove events — this module only
//! stores and mutates the resulting descriptors.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

pub type TargetIdx = u32;
pub type ServerId = u32;

/// Administrative / transient state bits reported by the last `statfs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetState {
    pub enospc: bool,
    pub enoino: bool,
    pub readonly: bool,
    pub noprecreate: bool,
    pub degraded: bool,
}

/// Last-observed statfs sample for one target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetStat {
    pub blocks_avail: u64,
    pub blocks_total: u64,
    pub block_size: u32,
    pub fprecreated: u32,
}

impl TargetStat {
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.blocks_avail.saturating_mul(u64::from(self.block_size))
    }
}

/// One storage target.
#[derive(Debug, Clone)]
pub struct TargetDescriptor {
    pub idx: TargetIdx,
    pub server: ServerId,
    pub state: TargetState,
    pub stat: TargetStat,
    pub active: bool,
    pub connecting: bool,
}

impl TargetDescriptor {
    #[must_use]
    pub fn new(idx: TargetIdx, server: ServerId) -> Self {
        Self {
            idx,
            server,
            state: TargetState::default(),
            stat: TargetStat::default(),
            active: true,
            connecting: false,
        }
    }
}

/// One storage server (fault domain).
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerDescriptor {
    pub id: ServerId,
    pub target_count: u32,
}

/// A named, ordered subset of targets. Insertion order is kept so offset
/// semantics (`stripe_offset` indexing into a pool) are deterministic.
#[derive(Debug, Clone, Default)]
pub struct Pool {
    pub name: String,
    pub members: Vec<TargetIdx>,
}

impl Pool {
    #[must_use]
    pub fn contains(&self, idx: TargetIdx) -> bool {
        self.members.contains(&idx)
    }

    #[must_use]
    pub fn position_of(&self, idx: TargetIdx) -> Option<usize> {
        self.members.iter().position(|&m| m == idx)
    }
}

/// Shared registry of targets, servers, and pools.
///
/// This is the one owning aggregate created at allocator setup and torn
/// down at shutdown; every other component holds a reference into it
/// rather than its own copy.
pub struct TargetTable {
    targets: RwLock<Vec<TargetDescriptor>>,
    servers: RwLock<HashMap<ServerId, ServerDescriptor>>,
    pools: RwLock<HashMap<String, Pool>>,
    active_count: AtomicU32,
}

impl TargetTable {
    #[must_use]
    pub fn new() -> Self {
        let mut pools = HashMap::new();
        pools.insert(String::new(), Pool::default());
        Self {
            targets: RwLock::new(Vec::new()),
            servers: RwLock::new(HashMap::new()),
            pools: RwLock::new(pools),
            active_count: AtomicU32::new(0),
        }
    }

    /// Register a new target, creating its server entry if needed, and
    /// add it to the default (unnamed) pool.
    pub fn add_target(&self, idx: TargetIdx, server: ServerId) {
        {
            let mut targets = self.targets.write();
            if targets.len() <= idx as usize {
                targets.resize_with(idx as usize + 1, || TargetDescriptor::new(0, 0));
            }
            targets[idx as usize] = TargetDescriptor::new(idx, server);
        }
        {
            let mut servers = self.servers.write();
            servers.entry(server).or_insert(ServerDescriptor { id: server, target_count: 0 }).target_count += 1;
        }
        {
            let mut pools = self.pools.write();
            pools.get_mut("").expect("default pool always present").members.push(idx);
        }
        self.active_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn remove_target(&self, idx: TargetIdx) {
        let server = {
            let targets = self.targets.read();
            targets.get(idx as usize).map(|t| t.server)
        };
        let Some(server) = server else { return };
        {
            let mut targets = self.targets.write();
            if let Some(t) = targets.get_mut(idx as usize) {
                if t.active {
                    self.active_count.fetch_sub(1, Ordering::SeqCst);
                }
                t.active = false;
            }
        }
        if let Some(s) = self.servers.write().get_mut(&server) {
            s.target_count = s.target_count.saturating_sub(1);
        }
        for pool in self.pools.write().values_mut() {
            pool.members.retain(|&m| m != idx);
        }
    }

    #[must_use]
    pub fn active_count(&self) -> u32 {
        self.active_count.load(Ordering::SeqCst)
    }

    pub fn with_target<R>(&self, idx: TargetIdx, f: impl FnOnce(&TargetDescriptor) -> R) -> Option<R> {
        self.targets.read().get(idx as usize).map(f)
    }

    pub fn with_target_mut<R>(&self, idx: TargetIdx, f: impl FnOnce(&mut TargetDescriptor) -> R) -> Option<R> {
        let mut guard = self.targets.write();
        let active_before = guard.get(idx as usize).map(|t| t.active);
        let result = guard.get_mut(idx as usize).map(f);
        if let Some(before) = active_before {
            let after = guard.get(idx as usize).map(|t| t.active).unwrap_or(before);
            if before != after {
                drop(guard);
                if after {
                    self.active_count.fetch_add(1, Ordering::SeqCst);
                } else {
                    self.active_count.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
        result
    }

    #[must_use]
    pub fn target_indices(&self) -> Vec<TargetIdx> {
        self.targets.read().iter().map(|t| t.idx).collect()
    }

    #[must_use]
    pub fn target_count(&self) -> usize {
        self.targets.read().len()
    }

    pub fn with_pool<R>(&self, name: &str, f: impl FnOnce(&Pool) -> R) -> Option<R> {
        self.pools.read().get(name).map(f)
    }

    pub fn create_pool(&self, name: &str) {
        self.pools
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Pool { name: name.to_string(), members: Vec::new() });
    }

    pub fn pool_add_member(&self, name: &str, idx: TargetIdx) {
        if let Some(pool) = self.pools.write().get_mut(name) {
            if !pool.members.contains(&idx) {
                pool.members.push(idx);
            }
        }
    }

    #[must_use]
    pub fn server_count(&self) -> usize {
        self.servers.read().len()
    }

    #[must_use]
    pub fn server_ids(&self) -> Vec<ServerId> {
        self.servers.read().keys().copied().collect()
    }

    pub fn with_server<R>(&self, id: ServerId, f: impl FnOnce(&ServerDescriptor) -> R) -> Option<R> {
        self.servers.read().get(&id).map(f)
    }
}

impl Default for TargetTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_target_populates_default_pool_and_server() {
        let table = TargetTable::new();
        table.add_target(0, 100);
        table.add_target(1, 100);
        table.add_target(2, 200);

        assert_eq!(table.active_count(), 3);
        assert_eq!(table.server_count(), 2);
        table.with_server(100, |s| assert_eq!(s.target_count, 2)).unwrap();
        table.with_pool("", |p| assert_eq!(p.members, vec![0, 1, 2])).unwrap();
    }

    #[test]
    fn remove_target_drops_active_count_and_pool_membership() {
        let table = TargetTable::new();
        table.add_target(0, 1);
        table.add_target(1, 1);
        table.remove_target(0);

        assert_eq!(table.active_count(), 1);
        table.with_pool("", |p| assert_eq!(p.members, vec![1])).unwrap();
    }

    #[test]
    fn named_pool_is_independent_of_default_pool() {
        let table = TargetTable::new();
        table.add_target(0, 1);
        table.add_target(1, 1);
        table.create_pool("fast");
        table.pool_add_member("fast", 1);

        table.with_pool("fast", |p| assert_eq!(p.members, vec![1])).unwrap();
        table.with_pool("", |p| assert_eq!(p.members.len(), 2)).unwrap();
    }
}
