// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::missing_panics_doc)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unreadable_literal)]

//! Black-box scenario tests against the allocator's public API.

use stripe_alloc::avoid::{AvoidanceGuide, Extent as AvoidExtent, SiblingComponent};
use stripe_alloc::backend::test_support::FakeBackend;
use stripe_alloc::backend::StatfsResult;
use stripe_alloc::config::AllocatorConfig;
use stripe_alloc::health::DirtyFlags;
use stripe_alloc::layout::{CompositeLayout, Extent, LayoutComponent, OFFSET_DEFAULT, PATTERN_RAID0, PATTERN_OVERSTRIPING};
use stripe_alloc::orchestrator::Allocator;
use stripe_alloc::policy::{rr as rr_policy, PlacementRequest};
use stripe_alloc::rr::RrTable;
use stripe_alloc::target::{TargetState, TargetStat, TargetTable};
use std::collections::HashSet;
use std::sync::Arc;

fn stat(free: u64) -> StatfsResult {
    StatfsResult {
        stat: TargetStat { blocks_avail: free, blocks_total: free.max(1), block_size: 1, fprecreated: 10 },
        state: TargetState::default(),
        connected: true,
    }
}

fn plain_component(stripe_count: u32) -> LayoutComponent {
    LayoutComponent {
        pattern: PATTERN_RAID0,
        stripe_size: 1 << 20,
        stripe_count,
        stripe_offset: OFFSET_DEFAULT,
        pool_name: None,
        explicit_ost_list: None,
        extent: Extent::WHOLE_FILE,
        flags: 0,
        id: 0,
        resolved_ost_indices: None,
    }
}

fn single_component_layout(comp: LayoutComponent) -> CompositeLayout {
    CompositeLayout {
        components: vec![comp],
        mirrors: vec![vec![0]],
        is_composite: false,
        flr_readonly: false,
        foreign_blob: None,
    }
}

/// S1: 8 active targets across 2 servers (4/4), stripe_count=4, no pool,
/// no overstripe. Expect 4 distinct targets, 2 from each server.
#[test]
fn s1_round_robin_spreads_across_both_servers() {
    let table = Arc::new(TargetTable::new());
    let backend = Arc::new(FakeBackend::new());
    for idx in 0..8u32 {
        let server = if idx < 4 { 1 } else { 2 };
        table.add_target(idx, server);
        backend.set(idx, stat(1_000_000));
    }
    let alloc = Allocator::new(table, backend, AllocatorConfig::new());

    let mut layout = single_component_layout(plain_component(4));
    alloc.create(&mut layout).unwrap();

    let picks = layout.components[0].resolved_ost_indices.clone().unwrap();
    assert_eq!(picks.len(), 4);
    let distinct: HashSet<_> = picks.iter().collect();
    assert_eq!(distinct.len(), 4);
    let server_1_count = picks.iter().filter(|&&p| p < 4).count();
    let server_2_count = picks.iter().filter(|&&p| p >= 4).count();
    assert_eq!(server_1_count, 2);
    assert_eq!(server_2_count, 2);
}

/// S3: explicit list `[0,1,0,1]`, stripe_count=4, overstriping. Expect
/// success with stripes placed in list order.
#[test]
fn s3_explicit_list_with_overstriping_repeats_targets() {
    let table = Arc::new(TargetTable::new());
    let backend = Arc::new(FakeBackend::new());
    for idx in 0..2u32 {
        table.add_target(idx, idx);
        backend.set(idx, stat(1_000_000));
    }
    let alloc = Allocator::new(table, backend, AllocatorConfig::new());

    let mut comp = plain_component(4);
    comp.pattern = PATTERN_RAID0 | PATTERN_OVERSTRIPING;
    comp.explicit_ost_list = Some(vec![0, 1, 0, 1]);
    comp.stripe_offset = OFFSET_DEFAULT;
    let mut layout = single_component_layout(comp);

    alloc.create(&mut layout).unwrap();
    let picks = layout.components[0].resolved_ost_indices.clone().unwrap();
    assert_eq!(picks, vec![0, 1, 0, 1]);
}

/// S4: explicit list with all-distinct targets but overstriping
/// requested; since nothing actually repeated, the stored pattern's
/// overstriping bit should be cleared.
#[test]
fn s4_overstripe_bit_clears_when_nothing_actually_repeated() {
    let table = Arc::new(TargetTable::new());
    let backend = Arc::new(FakeBackend::new());
    for idx in 0..4u32 {
        table.add_target(idx, idx);
        backend.set(idx, stat(1_000_000));
    }
    let alloc = Allocator::new(table, backend, AllocatorConfig::new());

    let mut comp = plain_component(4);
    comp.pattern = PATTERN_RAID0 | PATTERN_OVERSTRIPING;
    comp.explicit_ost_list = None;
    let mut layout = single_component_layout(comp);

    alloc.create(&mut layout).unwrap();
    assert_eq!(layout.components[0].pattern & PATTERN_OVERSTRIPING, 0);
}

/// S6: pool offset not a member of the named pool is rejected as invalid.
#[test]
fn s6_offset_not_in_pool_is_invalid() {
    let table = Arc::new(TargetTable::new());
    let backend = Arc::new(FakeBackend::new());
    for idx in 5..8u32 {
        table.add_target(idx, idx);
        backend.set(idx, stat(1_000_000));
    }
    table.create_pool("named");
    for idx in 5..8u32 {
        table.pool_add_member("named", idx);
    }
    let alloc = Allocator::new(table, backend, AllocatorConfig::new());

    let mut comp = plain_component(1);
    comp.pool_name = Some("named".to_string());
    comp.stripe_offset = 4;
    let mut layout = single_component_layout(comp);

    let err = alloc.create(&mut layout).unwrap_err();
    assert!(matches!(err, stripe_alloc::AllocError::Invalid(_)));
}

/// Invariant 3: a non-overstriped allocation never repeats a target.
#[test]
fn invariant_no_duplicate_targets_without_overstriping() {
    let table = Arc::new(TargetTable::new());
    let backend = Arc::new(FakeBackend::new());
    for idx in 0..6u32 {
        table.add_target(idx, idx % 3);
        backend.set(idx, stat(1_000_000));
    }
    let alloc = Allocator::new(table, backend, AllocatorConfig::new());

    let mut layout = single_component_layout(plain_component(6));
    alloc.create(&mut layout).unwrap();

    let picks = layout.components[0].resolved_ost_indices.clone().unwrap();
    let distinct: HashSet<_> = picks.iter().collect();
    assert_eq!(distinct.len(), picks.len());
}

/// S2: 3 targets with plentiful, near-equal free space and one severely
/// starved target. A single-stripe component allocated through the
/// public `Allocator::create` entry point should land on the starved
/// target in well under 1.5% of trials. Each trial builds a fresh
/// `Allocator` over the same shared table/backend, so every trial's
/// health cache starts un-swept and its weight model starts dirty —
/// this is what actually drives the stripe through the QoS-weighted
/// sampler rather than a round-robin fallback on an unprobed table.
#[test]
fn s2_qos_prefers_healthy_targets_over_a_severely_starved_one() {
    let table = Arc::new(TargetTable::new());
    let backend = Arc::new(FakeBackend::new());
    for idx in 0..3u32 {
        table.add_target(idx, idx);
        backend.set(idx, stat(1_000_000));
    }
    table.add_target(3, 3);
    backend.set(3, stat(1));

    let trials = 1000;
    let mut starved_hits = 0u32;
    for _ in 0..trials {
        let alloc = Allocator::new(table.clone(), backend.clone(), AllocatorConfig::new());
        let mut layout = single_component_layout(plain_component(1));
        alloc.create(&mut layout).unwrap();
        let picks = layout.components[0].resolved_ost_indices.clone().unwrap();
        if picks == vec![3] {
            starved_hits += 1;
        }
    }

    let frac = f64::from(starved_hits) / f64::from(trials);
    assert!(frac < 0.015, "starved target picked {:.4}% of {} trials", frac * 100.0, trials);
}

/// S5: mirror 0's component already occupies targets 0 and 2, both on
/// server 1. Allocating mirror 1's 2-stripe component with the
/// avoidance guide populated from that sibling should land on the
/// complementary targets on server 2: `{1, 3}`.
#[test]
fn s5_mirror_avoidance_lands_on_complementary_targets() {
    let table = Arc::new(TargetTable::new());
    let backend = FakeBackend::new();
    for (idx, server) in [(0u32, 1u32), (1, 2), (2, 1), (3, 2)] {
        table.add_target(idx, server);
        backend.set(idx, stat(1_000_000));
    }
    let rr = RrTable::new(table.clone(), DirtyFlags::new_dirty());

    let mut avoid = AvoidanceGuide::new();
    avoid.prepare(4);
    let siblings = vec![SiblingComponent {
        mirror_id: 0,
        extent: AvoidExtent { start: 0, end: u64::MAX },
        bound_targets: vec![(0, 1), (2, 1)],
    }];
    avoid.collect(1, AvoidExtent { start: 0, end: u64::MAX }, &siblings);

    let used = HashSet::new();
    let req = PlacementRequest {
        stripe_count: 2,
        overstriping: false,
        use_default_stripe: false,
        pool: "",
        used_by_sibling_component: &used,
    };

    let reservation = rr_policy::alloc_rr(&rr, &table, &backend, &avoid, &req).unwrap();
    let mut picks = reservation.picks().to_vec();
    picks.sort_unstable();
    assert_eq!(picks, vec![1, 3]);
}
