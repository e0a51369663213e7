// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS-weighted placement: weighted random sampling proportional to
//! adjusted free-space weight, falling back to round-robin when free
//! space is too uniform or too few targets remain usable.

use super::{PlacementRequest, Reservation};
use crate::avoid::AvoidanceGuide;
use crate::backend::Backend;
use crate::error::{AllocError, AllocResult};
use crate::target::TargetTable;
use crate::weight::WeightModel;

/// QoS allocation (`alloc_qos`). Returns `Err(AllocError::TryAgain)` when
/// the caller should fall back to round-robin instead of treating this
/// as a hard failure.
pub fn alloc_qos(
    weights: &WeightModel,
    table: &TargetTable,
    backend: &dyn Backend,
    avoid: &AvoidanceGuide,
    req: &PlacementRequest<'_>,
) -> AllocResult<Reservation> {
    if !weights.usable() {
        return Err(AllocError::TryAgain);
    }

    let min_needed = req.min_stripes().max(1) as usize;
    if weights.good_target_count() < min_needed {
        return Err(AllocError::TryAgain);
    }

    let stripe_count = req.stripe_count.min(weights.good_target_count() as u32);
    let mut reservation = Reservation::new();

    while reservation.len() < stripe_count as usize {
        let picked = weights.pick(|idx| {
            if req.used_by_sibling_component.contains(&idx) {
                return true;
            }
            // `pick` removes a target from its own round as soon as it's
            // chosen, so a target it offers here was never already in
            // `reservation` — the overstriping "unless already placed"
            // exception has nothing to apply to in this policy.
            let server = table.with_target(idx, |t| t.server).unwrap_or(0);
            avoid.should_avoid(idx, server)
        });

        let Some(idx) = picked else {
            log::debug!("qos weighted pick exhausted after {} of {} stripes", reservation.len(), stripe_count);
            break;
        };

        match backend.declare_create(idx) {
            Ok(handle) => reservation.push(handle),
            Err(_) => continue,
        }
    }

    if reservation.len() < min_needed {
        log::debug!("qos shortfall: {} of {} (min {}), falling back to rr", reservation.len(), stripe_count, min_needed);
        reservation.release(backend);
        return Err(AllocError::TryAgain);
    }

    Ok(reservation)
}
