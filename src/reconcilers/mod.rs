// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes reconcilers that react to watch events.

pub mod bucket;
pub mod orphans;

pub use bucket::{BucketController, BucketReconciler, Reconciliation};
pub use orphans::OrphanSweeper;
