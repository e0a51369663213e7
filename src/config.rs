// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime-adjustable allocator configuration.
//!
//! Two tiers, mirroring the split used elsewhere in this codebase:
//! - atomically-swapped scalars for the handful of hot tunables every
//!   allocation reads (`qos_maxage`, stripe defaults, default pool),
//! - a lock-free concurrent map for sparse, keyed per-target overrides
//!   (`degraded`, `noprecreate`) that an operator sets without touching
//!   the allocator's own locks.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-target administrative override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetOverride {
    pub degraded: bool,
    pub noprecreate: bool,
}

#[derive(Debug, Clone)]
struct Scalars {
    qos_maxage: Duration,
    default_stripe_count: u32,
    default_stripe_size: u64,
    default_pool: Option<Arc<str>>,
}

impl Default for Scalars {
    fn default() -> Self {
        Self {
            qos_maxage: Duration::from_secs(5),
            default_stripe_count: 1,
            default_stripe_size: 1 << 20,
            default_pool: None,
        }
    }
}

/// Cheaply cloneable handle to the allocator's runtime configuration.
///
/// `AllocatorConfig::clone()` is an `Arc` bump; every clone shares the
/// same underlying scalars and override map.
#[derive(Clone)]
pub struct AllocatorConfig {
    scalars: Arc<ArcSwap<Scalars>>,
    overrides: Arc<DashMap<u32, TargetOverride>>,
}

impl AllocatorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scalars: Arc::new(ArcSwap::new(Arc::new(Scalars::default()))),
            overrides: Arc::new(DashMap::new()),
        }
    }

    /// Staleness window used by the target health cache (see
    /// `health::TargetHealthCache::refresh_if_stale`).
    #[must_use]
    pub fn qos_maxage(&self) -> Duration {
        self.scalars.load().qos_maxage
    }

    pub fn set_qos_maxage(&self, age: Duration) {
        self.rcu(|s| s.qos_maxage = age);
    }

    #[must_use]
    pub fn default_stripe_count(&self) -> u32 {
        self.scalars.load().default_stripe_count
    }

    pub fn set_default_stripe_count(&self, count: u32) {
        self.rcu(|s| s.default_stripe_count = count);
    }

    #[must_use]
    pub fn default_stripe_size(&self) -> u64 {
        self.scalars.load().default_stripe_size
    }

    pub fn set_default_stripe_size(&self, size: u64) {
        self.rcu(|s| s.default_stripe_size = size);
    }

    #[must_use]
    pub fn default_pool(&self) -> Option<Arc<str>> {
        self.scalars.load().default_pool.clone()
    }

    pub fn set_default_pool(&self, name: Option<&str>) {
        let name = name.map(Arc::from);
        self.rcu(|s| s.default_pool = name.clone());
    }

    /// Mark a target degraded or not. Degraded targets are skipped by
    /// fast allocation passes and only used as a last resort (see
    /// `policy::rr` speed levels).
    pub fn set_degraded(&self, target: u32, degraded: bool) {
        let mut entry = self.overrides.entry(target).or_default();
        entry.degraded = degraded;
    }

    pub fn set_noprecreate(&self, target: u32, noprecreate: bool) {
        let mut entry = self.overrides.entry(target).or_default();
        entry.noprecreate = noprecreate;
    }

    #[must_use]
    pub fn overrides_for(&self, target: u32) -> TargetOverride {
        self.overrides.get(&target).map(|v| *v).unwrap_or_default()
    }

    pub fn clear_overrides(&self, target: u32) {
        self.overrides.remove(&target);
    }

    fn rcu(&self, f: impl FnOnce(&mut Scalars)) {
        let mut next = (**self.scalars.load()).clone();
        f(&mut next);
        self.scalars.store(Arc::new(next));
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::new()
    }
}
