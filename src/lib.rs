// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # stripe-alloc - Object-striping allocator for a parallel distributed filesystem
//!
//! Decides which storage targets (OSTs) back a file's stripes, balancing
//! free space and fault-domain diversity across storage servers (OSSs).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stripe_alloc::backend::test_support::FakeBackend;
//! use stripe_alloc::config::AllocatorConfig;
//! use stripe_alloc::layout::parse::parse_config;
//! use stripe_alloc::layout::LayoutDefaults;
//! use stripe_alloc::orchestrator::Allocator;
//! use stripe_alloc::target::TargetTable;
//! use std::sync::Arc;
//!
//! let table = Arc::new(TargetTable::new());
//! table.add_target(0, 1);
//! table.add_target(1, 2);
//! let backend = Arc::new(FakeBackend::new());
//! let alloc = Allocator::new(table, backend, AllocatorConfig::new());
//!
//! let defaults = LayoutDefaults {
//!     stripe_size: 1 << 20,
//!     stripe_count: 2,
//!     pool_name: None,
//!     active_target_count: 2,
//! };
//! let mut layout = parse_config(&[], &defaults).unwrap();
//! let _ = alloc.create(&mut layout);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                     Create Orchestrator (C7)                 |
//! |   per-component loop, policy selection, reservation rollback |
//! +-------------------------------------------------------------+
//! |  Layout Parser/Binder (C6)  |   Allocator Policies (C5)      |
//! |  wire decode, validation    |   rr | qos | ost_list | offset |
//! +-------------------------------------------------------------+
//! | Target Health Cache (C1) | RR Table (C2) | Weight (C3) | Avoid (C4) |
//! +-------------------------------------------------------------+
//! |                  Backend (statfs / declare_create)           |
//! +-------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`orchestrator::Allocator`] | Entry point: drives per-component placement |
//! | [`target::TargetTable`] | Shared registry of targets, servers, and pools |
//! | [`layout::CompositeLayout`] | Parsed/bound layout ready for allocation |
//! | [`backend::Backend`] | Transport contract (statfs, declare_create) |
//! | [`config::AllocatorConfig`] | Runtime-adjustable tunables |
//!
//! ## Modules Overview
//!
//! - [`orchestrator`] - per-component allocation loop (start here)
//! - [`policy`] - the four placement algorithms
//! - [`layout`] - wire decode and validation of layout hints
//! - [`target`] - target/server descriptors and pool registry
//! - [`health`] - statfs cache with staleness-window refresh
//! - [`rr`] - round-robin interleave table
//! - [`weight`] - QoS weight model
//! - [`avoid`] - cross-mirror avoidance guide
//! - [`config`] - runtime configuration
//! - [`error`] - error taxonomy

// Allow the derive-adjacent doctest above to refer to the crate by name.
extern crate self as stripe_alloc;

pub mod avoid;
pub mod backend;
pub mod config;
pub mod error;
pub mod faultinject;
pub mod health;
pub mod layout;
/// Compile-time configurable logging system (zero-cost when disabled).
pub mod logging;
pub mod orchestrator;
pub mod policy;
pub mod rr;
pub mod target;
pub mod weight;

pub use error::{AllocError, AllocResult};
pub use orchestrator::Allocator;
