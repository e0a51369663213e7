// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Layout types, wire-format constants, and the parse/bind entry points.
//!
//! A layout hint arrives as a byte buffer in one of five shapes (plain,
//! pooled, explicit-list, composite/mirrored, or opaque foreign) and is
//! normalized here into a [`CompositeLayout`] the allocator policies can
//! consume. See [`parse`] for the wire-level decoding.

pub mod parse;

use crate::error::{AllocError, AllocResult};
use crate::target::TargetIdx;

/// Sentinel meaning "use the pool/device default offset", not a real
/// target index.
pub const OFFSET_DEFAULT: u32 = u32::MAX;

pub const PATTERN_RAID0: u32 = 0x0000_0001;
pub const PATTERN_MDT: u32 = 0x0000_0100;
pub const PATTERN_OVERSTRIPING: u32 = 0x0000_2000;
pub const PATTERN_RELEASED: u32 = 0x0000_4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub start: u64,
    pub end: u64,
}

impl Extent {
    pub const WHOLE_FILE: Extent = Extent { start: 0, end: u64::MAX };
}

/// One allocation request within a (possibly composite) layout.
#[derive(Debug, Clone)]
pub struct LayoutComponent {
    pub pattern: u32,
    pub stripe_size: u64,
    pub stripe_count: u32,
    pub stripe_offset: u32,
    pub pool_name: Option<String>,
    pub explicit_ost_list: Option<Vec<TargetIdx>>,
    pub extent: Extent,
    pub flags: u32,
    pub id: u32,
    pub resolved_ost_indices: Option<Vec<TargetIdx>>,
}

impl LayoutComponent {
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.pattern & PATTERN_RELEASED != 0
    }

    #[must_use]
    pub fn is_mdt(&self) -> bool {
        self.pattern & PATTERN_MDT != 0
    }

    #[must_use]
    pub fn is_overstriping(&self) -> bool {
        self.pattern & PATTERN_OVERSTRIPING != 0
    }

    pub fn clear_overstriping(&mut self) {
        self.pattern &= !PATTERN_OVERSTRIPING;
    }
}

/// Fully parsed/bound layout, possibly mirrored.
#[derive(Debug, Clone, Default)]
pub struct CompositeLayout {
    pub components: Vec<LayoutComponent>,
    /// `mirrors[m]` is the list of component indices in mirror `m`.
    pub mirrors: Vec<Vec<usize>>,
    pub is_composite: bool,
    /// Set once `mirrors.len() > 1`: mirrored layouts are read-only to
    /// writers that don't go through the mirroring-aware write path.
    pub flr_readonly: bool,
    /// Opaque blob kept verbatim for `FOREIGN` layouts; no allocation is
    /// performed when this is set.
    pub foreign_blob: Option<Vec<u8>>,
}

impl CompositeLayout {
    #[must_use]
    pub fn mirror_of(&self, comp_idx: usize) -> Option<u32> {
        self.mirrors
            .iter()
            .position(|ids| ids.contains(&comp_idx))
            .map(|m| m as u32)
    }
}

/// Device-wide defaults consulted when a component omits a field.
#[derive(Debug, Clone)]
pub struct LayoutDefaults {
    pub stripe_size: u64,
    pub stripe_count: u32,
    pub pool_name: Option<String>,
    pub active_target_count: u32,
}

/// Maximum encoded attribute size the backing store can hold for one
/// object's layout, used by [`get_stripe_count`] to bound composite
/// stripe counts.
const DEFAULT_MAX_EASIZE: usize = 65536;
const PER_STRIPE_ENCODED_SIZE: usize = 24;
const HEADER_SIZE: usize = 32;
const POOL_NAME_ENCODED_SIZE: usize = 16;

/// Resolve the usable stripe count for one component, honoring the
/// device default, overstriping, and (for composite layouts) the
/// backing-store attribute-size bound.
#[must_use]
pub fn get_stripe_count(
    requested: u32,
    overstriping: bool,
    defaults: &LayoutDefaults,
    other_components_encoded_size: usize,
    has_pool_name: bool,
    max_easize: Option<usize>,
) -> u32 {
    let mut count = if requested == 0 { defaults.stripe_count } else { requested };
    if count == 0 {
        count = 1;
    }
    if !overstriping && count > defaults.active_target_count {
        count = defaults.active_target_count.max(1);
    }

    let max_easize = max_easize.unwrap_or(DEFAULT_MAX_EASIZE);
    let per_component_header = HEADER_SIZE + if has_pool_name { POOL_NAME_ENCODED_SIZE } else { 0 };
    let budget = max_easize.saturating_sub(other_components_encoded_size + per_component_header);
    let max_from_easize = (budget / PER_STRIPE_ENCODED_SIZE).max(1) as u32;

    count.min(max_from_easize)
}

/// Re-hydrate an already-bound ("defined") layout: the stripe indices in
/// the buffer are used verbatim, no health refresh or policy pick is
/// performed. Distinct failure mode from `bind_fresh`: a malformed
/// defined buffer is always `Invalid`, never `NoSpace`.
pub fn bind_defined(layout: CompositeLayout) -> AllocResult<CompositeLayout> {
    for comp in &layout.components {
        if comp.resolved_ost_indices.is_none() && !comp.is_mdt() && !comp.is_released() {
            return Err(AllocError::Invalid(
                "defined layout component is missing resolved stripe objects".into(),
            ));
        }
    }
    Ok(layout)
}
