// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the striping allocator.

use std::fmt;

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors produced by the allocator and layout parser.
#[derive(Debug)]
pub enum AllocError {
    /// No target could provide an object for this component.
    NoSpace,

    /// Transient: QoS weights could not converge, or an RR table rebuild
    /// raced with a concurrent dirty. Caller should pick a different
    /// policy or retry.
    TryAgain,

    /// Every candidate target failed, but at least one was still
    /// `connecting`. Distinct from `NoSpace` so callers can retry later.
    InProgress,

    /// Layout hint failed validation.
    Invalid(String),

    /// Explicit-list or offset-anchored policy placed fewer than the
    /// requested stripe count, but at least one stripe succeeded.
    TooBig { placed: usize, requested: usize },

    /// An explicit target index does not exist.
    NoSuchDevice(u32),

    /// Requested pool is unknown.
    NoSuchPool(String),

    /// Target is read-only.
    ReadOnly(u32),

    /// Target has no free space or no precreated objects.
    Full(u32),

    /// Target's transport reports not connected.
    Disconnected(u32),

    /// Scratch allocation failed.
    OutOfMemory,
}

impl AllocError {
    /// Whether this error should be surfaced to the caller as opposed to
    /// handled internally by skipping the target and continuing.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::ReadOnly(_) | Self::Full(_) | Self::Disconnected(_)
        )
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpace => write!(f, "no target available to place an object"),
            Self::TryAgain => write!(f, "allocation should be retried with a different policy"),
            Self::InProgress => write!(f, "candidates exhausted but some targets are reconnecting"),
            Self::Invalid(msg) => write!(f, "invalid layout: {}", msg),
            Self::TooBig { placed, requested } => {
                write!(f, "placed {} of {} requested stripes", placed, requested)
            }
            Self::NoSuchDevice(idx) => write!(f, "no such target: {}", idx),
            Self::NoSuchPool(name) => write!(f, "no such pool: {}", name),
            Self::ReadOnly(idx) => write!(f, "target {} is read-only", idx),
            Self::Full(idx) => write!(f, "target {} is full", idx),
            Self::Disconnected(idx) => write!(f, "target {} is disconnected", idx),
            Self::OutOfMemory => write!(f, "scratch allocation failed"),
        }
    }
}

impl std::error::Error for AllocError {}
