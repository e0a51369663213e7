// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Round-robin placement: walk the interleave table from a shared
//! cursor, skipping unhealthy or avoided targets, retrying at
//! increasingly permissive speed levels.

use super::{PlacementRequest, Reservation, Speed};
use crate::avoid::AvoidanceGuide;
use crate::backend::Backend;
use crate::error::{AllocError, AllocResult};
use crate::faultinject;
use crate::rr::RrTable;
use crate::target::{TargetIdx, TargetTable};

enum CheckOutcome {
    Placed,
    Skip,
}

fn check_and_reserve(
    idx: TargetIdx,
    speed: Speed,
    table: &TargetTable,
    backend: &dyn Backend,
    avoid: &AvoidanceGuide,
    req: &PlacementRequest<'_>,
    reservation: &mut Reservation,
) -> CheckOutcome {
    let stat = match backend.statfs(idx) {
        Ok(s) => s,
        Err(_) => return CheckOutcome::Skip,
    };
    if !stat.connected {
        reservation.saw_connecting = true;
        return CheckOutcome::Skip;
    }
    if stat.state.enospc || (stat.state.enoino && stat.stat.fprecreated == 0) {
        return CheckOutcome::Skip;
    }
    if stat.state.readonly || stat.state.noprecreate {
        return CheckOutcome::Skip;
    }
    if stat.stat.fprecreated == 0 && speed == Speed::STRICT {
        return CheckOutcome::Skip;
    }
    if stat.state.degraded && speed < Speed::DESPERATE {
        return CheckOutcome::Skip;
    }
    if req.used_by_sibling_component.contains(&idx) && speed == Speed::STRICT {
        return CheckOutcome::Skip;
    }
    let server = table.with_target(idx, |t| t.server).unwrap_or(0);
    if avoid.should_avoid(idx, server) && speed < Speed::DESPERATE {
        return CheckOutcome::Skip;
    }
    if reservation.contains(idx) {
        if req.overstriping {
            reservation.overstriped = true;
        } else {
            return CheckOutcome::Skip;
        }
    }

    match backend.declare_create(idx) {
        Ok(handle) => {
            reservation.push(handle);
            CheckOutcome::Placed
        }
        Err(_) => CheckOutcome::Skip,
    }
}

/// Round-robin allocation (`alloc_rr`). Returns a reservation with at
/// least `req.min_stripes()` picks, or an error if none could be placed.
pub fn alloc_rr(
    rr: &RrTable,
    table: &TargetTable,
    backend: &dyn Backend,
    avoid: &AvoidanceGuide,
    req: &PlacementRequest<'_>,
) -> AllocResult<Reservation> {
    rr.ensure_current(req.pool)?;
    let pool_count = rr.len();
    if pool_count == 0 {
        return Err(AllocError::NoSpace);
    }

    let min_needed = req.min_stripes().max(1) as usize;
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
        for iteration in 0..max_attempts {
            if reservation.len() >= req.stripe_count as usize {
                break;
            }
            let pos = rr.advance();
            let Some(idx) = rr.get(pos) else { continue };
            if faultinject::should_skip(idx, iteration) {
                continue;
            }
            if let CheckOutcome::Placed =
                check_and_reserve(idx, speed, table, backend, avoid, req, &mut reservation)
            {
                // placed
            }
        }
        if reservation.len() >= min_needed {
            break;
        }
    }

    if reservation.is_empty() {
        if reservation.saw_connecting {
            return Err(AllocError::InProgress);
        }
        return Err(AllocError::NoSpace);
    }
    if reservation.len() < min_needed {
        reservation.release(backend);
        return Err(AllocError::NoSpace);
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

    fn healthy_stat() -> StatfsResult {
        StatfsResult {
            stat: TargetStat { blocks_avail: 100, blocks_total: 100, block_size: 4096, fprecreated: 10 },
            state: TargetState::default(),
            connected: true,
        }
    }

    #[test]
    fn places_requested_stripe_count_across_distinct_targets() {
        let table = Arc::new(TargetTable::new());
        for (idx, server) in [(0, 1), (1, 1), (2, 2), (3, 2)] {
            table.add_target(idx, server);
        }
        let rr = RrTable::new(table.clone(), DirtyFlags::new_dirty());
        let backend = FakeBackend::new();
        for idx in 0..4 {
            backend.set(idx, healthy_stat());
        }
        let avoid = AvoidanceGuide::new();
        let used = HashSet::new();
        let req = PlacementRequest {
            stripe_count: 4,
            overstriping: false,
            use_default_stripe: false,
            pool: "",
            used_by_sibling_component: &used,
        };

        let reservation = alloc_rr(&rr, &table, &backend, &avoid, &req).unwrap();
        assert_eq!(reservation.len(), 4);
        let mut picks = reservation.picks().to_vec();
        picks.sort_unstable();
        assert_eq!(picks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn skips_full_targets() {
        let table = Arc::new(TargetTable::new());
        table.add_target(0, 1);
        table.add_target(1, 2);
        let rr = RrTable::new(table.clone(), DirtyFlags::new_dirty());
        let backend = FakeBackend::new();
        backend.set(0, StatfsResult {
            state: crate::target::TargetState { enospc: true, ..Default::default() },
            ..healthy_stat()
        });
        backend.set(1, healthy_stat());
        let avoid = AvoidanceGuide::new();
        let used = HashSet::new();
        let req = PlacementRequest {
            stripe_count: 1,
            overstriping: false,
            use_default_stripe: false,
            pool: "",
            used_by_sibling_component: &used,
        };

        let reservation = alloc_rr(&rr, &table, &backend, &avoid, &req).unwrap();
        assert_eq!(reservation.picks(), &[1]);
    }

    #[test]
    fn no_healthy_targets_returns_no_space() {
        let table = Arc::new(TargetTable::new());
        table.add_target(0, 1);
        let rr = RrTable::new(table.clone(), DirtyFlags::new_dirty());
        let backend = FakeBackend::new();
        backend.set(0, StatfsResult {
            state: crate::target::TargetState { enospc: true, ..Default::default() },
            ..healthy_stat()
        });
        let avoid = AvoidanceGuide::new();
        let used = HashSet::new();
        let req = PlacementRequest {
            stripe_count: 1,
            overstriping: false,
            use_default_stripe: false,
            pool: "",
            used_by_sibling_component: &used,
        };

        let err = alloc_rr(&rr, &table, &backend, &avoid, &req).unwrap_err();
        assert!(matches!(err, AllocError::NoSpace));
    }
}
