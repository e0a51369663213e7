// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-mirror avoidance guide: per-allocation scratch state that
//! steers stripe placement away from targets and servers already used
//! by overlapping components of other mirrors, so a read can fail over
//! to a mirror whose objects live on different fault domains.

use crate::target::{ServerId, TargetIdx};
use std::collections::HashSet;

/// One component's extent, used only to test overlap against sibling
/// mirrors' already-bound components.
#[derive(Debug, Clone, Copy)]
pub struct Extent {
    pub start: u64,
    pub end: u64,
}

impl Extent {
    #[must_use]
    pub fn overlaps(&self, other: &Extent) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A sibling component considered during avoidance collection: which
/// mirror it belongs to, its extent, and the targets already bound to
/// it (empty if not yet instantiated).
pub struct SiblingComponent {
    pub mirror_id: u32,
    pub extent: Extent,
    pub bound_targets: Vec<(TargetIdx, ServerId)>,
}

/// Per-allocation avoidance scratch state. Reset via [`AvoidanceGuide::prepare`]
/// at the start of each component allocation; never shared across
/// allocations or threads.
pub struct AvoidanceGuide {
    avoid_targets: HashSet<TargetIdx>,
    avoid_servers: HashSet<ServerId>,
    ost_avail: usize,
}

impl AvoidanceGuide {
    #[must_use]
    pub fn new() -> Self {
        Self {
            avoid_targets: HashSet::new(),
            avoid_servers: HashSet::new(),
            ost_avail: 0,
        }
    }

    /// Reset scratch state ahead of allocating one component.
    pub fn prepare(&mut self, active_target_count: usize) {
        self.avoid_targets.clear();
        self.avoid_servers.clear();
        self.ost_avail = active_target_count;
    }

    /// Fold in every target used by an overlapping, already-bound
    /// component belonging to a different mirror than `this_mirror`.
    pub fn collect(&mut self, this_mirror: u32, this_extent: Extent, siblings: &[SiblingComponent]) {
        for sib in siblings {
            if sib.mirror_id == this_mirror {
                continue;
            }
            if sib.bound_targets.is_empty() || !sib.extent.overlaps(&this_extent) {
                continue;
            }
            for &(idx, server) in &sib.bound_targets {
                if self.avoid_targets.insert(idx) {
                    self.ost_avail = self.ost_avail.saturating_sub(1);
                }
                self.avoid_servers.insert(server);
            }
        }
    }

    /// Whether `idx` should be skipped for this pick. Best-effort: once
    /// avoidance has consumed all remaining targets (`ost_avail == 0`),
    /// it stops refusing placements so the allocation can still succeed.
    #[must_use]
    pub fn should_avoid(&self, idx: TargetIdx, server: ServerId) -> bool {
        if self.ost_avail == 0 {
            return false;
        }
        self.avoid_servers.contains(&server) && self.avoid_targets.contains(&idx)
    }

    #[must_use]
    pub fn ost_avail(&self) -> usize {
        self.ost_avail
    }
}

impl Default for AvoidanceGuide {
    fn default() -> Self {
        Self::new()
    }
}
