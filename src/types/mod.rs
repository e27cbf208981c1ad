// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource types owned by the operator.

pub mod bucket;

pub use bucket::{BucketState, ResourceKey, S3Bucket, S3BucketSpec, S3BucketStatus};
