// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Offset-anchored placement (`alloc_specific`): scan forward from a
//! caller-chosen starting position in the pool's RR order, wrapping
//! around, tolerating the same health relaxations as round-robin except
//! that the starting target itself is never skipped for a "slow" reason.

use super::{PlacementRequest, Reservation, Speed};
use crate::avoid::AvoidanceGuide;
use crate::backend::Backend;
use crate::error::{AllocError, AllocResult};
use crate::rr::RrTable;
use crate::target::{TargetIdx, TargetTable};

fn probe_and_reserve(
    idx: TargetIdx,
    speed: Speed,
    is_anchor: bool,
    table: &TargetTable,
    backend: &dyn Backend,
    avoid: &AvoidanceGuide,
    req: &PlacementRequest<'_>,
    reservation: &mut Reservation,
) -> bool {
    let Ok(stat) = backend.statfs(idx) else { return false };
    if !stat.connected {
        reservation.saw_connecting = true;
        return false;
    }
    if stat.state.enospc || (stat.state.enoino && stat.stat.fprecreated == 0) {
        return false;
    }
    if stat.state.readonly {
        return false;
    }
    if !is_anchor {
        if stat.state.noprecreate || (stat.stat.fprecreated == 0 && speed == Speed::STRICT) {
            return false;
        }
        if stat.state.degraded && speed < Speed::DESPERATE {
            return false;
        }
        let server = table.with_target(idx, |t| t.server).unwrap_or(0);
        if avoid.should_avoid(idx, server) && speed < Speed::DESPERATE {
            return false;
        }
    }
    if reservation.contains(idx) {
        if req.overstriping {
            reservation.overstriped = true;
        } else {
            return false;
        }
    }

    match backend.declare_create(idx) {
        Ok(handle) => {
            reservation.push(handle);
            true
        }
        Err(_) => false,
    }
}

pub fn alloc_specific(
    rr: &RrTable,
    table: &TargetTable,
    backend: &dyn Backend,
    avoid: &AvoidanceGuide,
    req: &PlacementRequest<'_>,
    start_target: TargetIdx,
) -> AllocResult<Reservation> {
    rr.ensure_current(req.pool)?;
    let pool_count = rr.len();
    if pool_count == 0 {
        return Err(AllocError::Invalid("pool is empty".into()));
    }

    let start_pos = (0..pool_count).find(|&p| rr.get(p) == Some(start_target));
    let Some(start_pos) = start_pos else {
        return Err(AllocError::Invalid(format!(
            "offset target {} is not a member of pool '{}'",
            start_target, req.pool
        )));
    };

    let stripes_per_ost = if req.overstriping {
        (req.stripe_count as usize).div_ceil(pool_count).max(1)
    } else {
        1
    };
    let max_attempts = pool_count * stripes_per_ost;

    let mut reservation = Reservation::new();
    for speed in [Speed::STRICT, Speed::RELAXED, Speed::DESPERATE] {
        if reservation.len() >= req.stripe_count as usize {
            break;
        }
        for step in 0..max_attempts {
            if reservation.len() >= req.stripe_count as usize {
                break;
            }
            let pos = (start_pos + step) % pool_count;
            let Some(idx) = rr.get(pos) else { continue };
            let is_anchor = step == 0;
            probe_and_reserve(idx, speed, is_anchor, table, backend, avoid, req, &mut reservation);
        }
    }

    if reservation.is_empty() {
        return Err(AllocError::NoSpace);
    }
    if reservation.len() < req.stripe_count as usize {
        return Err(AllocError::TooBig { placed: reservation.len(), requested: req.stripe_count as usize });
    }

    Ok(reservation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::FakeBackend;
    use crate::backend::StatfsResult;
    use crate::health::DirtyFlags;
    use crate::target::{TargetState, TargetStat};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn healthy() -> StatfsResult {
        StatfsResult {
            stat: TargetStat { blocks_avail: 10, blocks_total: 10, block_size: 1, fprecreated: 5 },
            state: TargetState::default(),
            connected: true,
        }
    }

    #[test]
    fn unknown_offset_is_invalid() {
        let table = Arc::new(TargetTable::new());
        table.add_target(0, 0);
        let rr = RrTable::new(table.clone(), DirtyFlags::new_dirty());
        let backend = FakeBackend::new();
        let avoid = AvoidanceGuide::new();
        let used = HashSet::new();
        let req = PlacementRequest {
            stripe_count: 1,
            overstriping: false,
            use_default_stripe: false,
            pool: "",
            used_by_sibling_component: &used,
        };
        let err = alloc_specific(&rr, &table, &backend, &avoid, &req, 99).unwrap_err();
        assert!(matches!(err, AllocError::Invalid(_)));
    }

    #[test]
    fn places_from_anchor_forward() {
        let table = Arc::new(TargetTable::new());
        for idx in 0..4u32 {
            table.add_target(idx, idx);
            table.with_target_mut(idx, |_| {});
        }
        let rr = RrTable::new(table.clone(), DirtyFlags::new_dirty());
        let backend = FakeBackend::new();
        for idx in 0..4u32 {
            backend.set(idx, healthy());
        }
        let avoid = AvoidanceGuide::new();
        let used = HashSet::new();
        let req = PlacementRequest {
            stripe_count: 2,
            overstriping: false,
            use_default_stripe: false,
            pool: "",
            used_by_sibling_component: &used,
        };
        let reservation = alloc_specific(&rr, &table, &backend, &avoid, &req, 0).unwrap();
        assert_eq!(reservation.len(), 2);
    }
}
