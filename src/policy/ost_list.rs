// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Explicit target list placement: the caller names targets directly
//! (`alloc_ost_list`). Any probe failure is fatal — there is no retry,
//! since the caller asked for these specific targets.

use super::Reservation;
use crate::backend::{Backend, ObjectHandle};
use crate::error::{AllocError, AllocResult};
use crate::target::{TargetIdx, TargetTable};

fn place_one(idx: TargetIdx, backend: &dyn Backend) -> AllocResult<ObjectHandle> {
    let stat = backend.statfs(idx)?;
    if stat.state.enospc || stat.state.readonly {
        return Err(AllocError::Full(idx));
    }
    if !stat.connected {
        return Err(AllocError::Disconnected(idx));
    }
    backend.declare_create(idx)
}

pub fn alloc_ost_list(
    table: &TargetTable,
    backend: &dyn Backend,
    list: &[TargetIdx],
    offset: usize,
    overstriping: bool,
) -> AllocResult<Reservation> {
    if list.is_empty() {
        return Err(AllocError::Invalid("explicit target list is empty".into()));
    }
    for &idx in list {
        if table.with_target(idx, |_| ()).is_none() {
            return Err(AllocError::NoSuchDevice(idx));
        }
    }
    if !overstriping {
        let mut seen = std::collections::HashSet::new();
        for &idx in list {
            if !seen.insert(idx) {
                return Err(AllocError::Invalid(format!(
                    "duplicate target {} in explicit list without overstriping",
                    idx
                )));
            }
        }
    }

    let mut reservation = Reservation::new();
    let n = list.len();
    for i in 0..n {
        let idx = list[(offset + i) % n];
        if overstriping && reservation.contains(idx) {
            reservation.overstriped = true;
        }
        match place_one(idx, backend) {
            Ok(handle) => reservation.push(handle),
            Err(e) => {
                reservation.release(backend);
                return Err(e);
            }
        }
    }

    Ok(reservation)
}
