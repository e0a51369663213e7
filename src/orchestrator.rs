// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Create orchestrator: drives per-component allocation across the
//! layout, picking a policy, falling back from QoS to round-robin, and
//! rolling back a component's reservation on failure.

use crate::avoid::{AvoidanceGuide, Extent as AvoidExtent, SiblingComponent};
use crate::backend::Backend;
use crate::config::AllocatorConfig;
use crate::error::{AllocError, AllocResult};
use crate::health::{DirtyFlags, TargetHealthCache};
use crate::layout::{get_stripe_count, CompositeLayout, LayoutDefaults, OFFSET_DEFAULT};
use crate::policy::{ost_list, qos, rr as rr_policy, specific, PlacementRequest};
use crate::rr::RrTable;
use crate::target::{TargetIdx, TargetTable};
use crate::weight::WeightModel;
use std::collections::HashSet;
use std::sync::Arc;

/// Ties together the target registry and the four policies behind one
/// entry point: [`Allocator::create`].
pub struct Allocator {
    table: Arc<TargetTable>,
    backend: Arc<dyn Backend>,
    config: AllocatorConfig,
    health: TargetHealthCache,
    rr: RrTable,
    weights: WeightModel,
}

impl Allocator {
    #[must_use]
    pub fn new(table: Arc<TargetTable>, backend: Arc<dyn Backend>, config: AllocatorConfig) -> Self {
        let dirty = DirtyFlags::new_dirty();
        let health = TargetHealthCache::new(table.clone(), backend.clone(), config.clone(), dirty.clone());
        let rr = RrTable::new(table.clone(), dirty.clone());
        let weights = WeightModel::new(table.clone(), dirty);
        Self { table, backend, config, health, rr, weights }
    }

    #[must_use]
    pub fn table(&self) -> &Arc<TargetTable> {
        &self.table
    }

    /// Allocate stripes for every allocatable component of `layout`, in
    /// order. Mutates each component's `resolved_ost_indices` in place.
    /// On the first hard failure, every earlier reservation made during
    /// *this* call is rolled back and the error is returned; components
    /// that were already bound before the call (e.g. re-layout of a
    /// partially-striped file) are left untouched.
    pub fn create(&self, layout: &mut CompositeLayout) -> AllocResult<()> {
        let mut bound_this_call: Vec<(usize, crate::policy::Reservation)> = Vec::new();

        for i in 0..layout.components.len() {
            if layout.components[i].is_released() || layout.components[i].is_mdt() {
                continue;
            }

            match self.allocate_component(layout, i) {
                Ok(reservation) => bound_this_call.push((i, reservation)),
                Err(e) => {
                    log::warn!("component {} allocation failed: {}", i, e);
                    for (done, reservation) in bound_this_call {
                        layout.components[done].resolved_ost_indices = None;
                        layout.components[done].stripe_count = 0;
                        reservation.release(self.backend.as_ref());
                    }
                    layout.components[i].stripe_count = 0;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn allocate_component(&self, layout: &mut CompositeLayout, idx: usize) -> AllocResult<crate::policy::Reservation> {
        self.health.refresh_if_stale(self.config.qos_maxage());

        let active_target_count = self.table.active_count();
        let defaults = LayoutDefaults {
            stripe_size: self.config.default_stripe_size(),
            stripe_count: self.config.default_stripe_count(),
            pool_name: self.config.default_pool().map(|p| p.to_string()),
            active_target_count,
        };

        let requested = layout.components[idx].stripe_count;
        let has_pool = layout.components[idx].pool_name.is_some();
        let overstriping = layout.components[idx].is_overstriping();
        let stripe_count = get_stripe_count(requested, overstriping, &defaults, 0, has_pool, None);
        layout.components[idx].stripe_count = stripe_count;

        let pool = layout.components[idx].pool_name.clone().unwrap_or_default();
        let used_by_sibling_component = self.used_by_other_components(layout, idx);
        let use_default_stripe = requested == 0;

        let req = PlacementRequest {
            stripe_count,
            overstriping,
            use_default_stripe,
            pool: &pool,
            used_by_sibling_component: &used_by_sibling_component,
        };

        let explicit = layout.components[idx].explicit_ost_list.clone();
        let stripe_offset = layout.components[idx].stripe_offset;

        let reservation = if let Some(list) = explicit {
            let offset = if stripe_offset == OFFSET_DEFAULT { 0 } else { stripe_offset as usize };
            ost_list::alloc_ost_list(&self.table, self.backend.as_ref(), &list, offset, overstriping)?
        } else if stripe_offset == OFFSET_DEFAULT {
            let mut avoid = AvoidanceGuide::new();
            avoid.prepare(active_target_count as usize);
            let siblings = self.sibling_extents(layout, idx);
            let this_mirror = layout.mirror_of(idx).unwrap_or(0);
            avoid.collect(this_mirror, to_avoid_extent(layout.components[idx].extent), &siblings);

            self.weights.recompute(&self.table.with_pool(&pool, |p| p.members.clone()).unwrap_or_default());
            match qos::alloc_qos(&self.weights, &self.table, self.backend.as_ref(), &avoid, &req) {
                Ok(r) => r,
                Err(AllocError::TryAgain) => {
                    rr_policy::alloc_rr(&self.rr, &self.table, self.backend.as_ref(), &avoid, &req)?
                }
                Err(e) => return Err(e),
            }
        } else {
            let avoid = AvoidanceGuide::new();
            specific::alloc_specific(&self.rr, &self.table, self.backend.as_ref(), &avoid, &req, stripe_offset)?
        };

        let overstriped = reservation.overstriped;
        let picks: Vec<TargetIdx> = reservation.picks().to_vec();
        layout.components[idx].resolved_ost_indices = Some(picks.clone());
        layout.components[idx].stripe_count = picks.len() as u32;
        if overstriping && !overstriped {
            layout.components[idx].clear_overstriping();
        }

        Ok(reservation)
    }

    fn used_by_other_components(&self, layout: &CompositeLayout, idx: usize) -> HashSet<TargetIdx> {
        let mut used = HashSet::new();
        for (i, comp) in layout.components.iter().enumerate() {
            if i == idx {
                continue;
            }
            if let Some(resolved) = &comp.resolved_ost_indices {
                used.extend(resolved.iter().copied());
            }
        }
        used
    }

    fn sibling_extents(&self, layout: &CompositeLayout, idx: usize) -> Vec<SiblingComponent> {
        let mut out = Vec::new();
        for (i, comp) in layout.components.iter().enumerate() {
            if i == idx {
                continue;
            }
            let mirror_id = layout.mirror_of(i).unwrap_or(0);
            let bound_targets: Vec<_> = comp
                .resolved_ost_indices
                .as_ref()
                .map(|ids| {
                    ids.iter()
                        .filter_map(|&t| self.table.with_target(t, |td| (t, td.server)))
                        .collect()
                })
                .unwrap_or_default();
            out.push(SiblingComponent { mirror_id, extent: to_avoid_extent(comp.extent), bound_targets });
        }
        out
    }
}

fn to_avoid_extent(e: crate::layout::Extent) -> AvoidExtent {
    AvoidExtent { start: e.start, end: e.end }
}
