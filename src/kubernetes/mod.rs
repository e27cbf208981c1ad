// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery, cluster access and workload lookup.

pub mod client;
pub mod crd;
pub mod workloads;

pub use client::{ClusterApi, KubeCluster};
pub use crd::wait_for_bucket_crd;
pub use workloads::{find_matching_controllers, WorkloadController, WorkloadKind};
