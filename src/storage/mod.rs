// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Bucket storage and identity role capabilities, plus the pure logic that
//! decides how to mutate them.

pub mod aws;
pub mod ownership;
pub mod provisioner;
pub mod tags;

use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

pub use aws::{AwsIdentity, AwsStorage};
pub use ownership::{LiveBucketState, OwnershipVerifier};
pub use provisioner::StorageProvisioner;
pub use tags::{TagCodec, TagDiff};

/// A single key/value tag on a bucket or role
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Bucket operations of the object storage API, keyed by bucket name.
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Fails with [`OperatorError::Conflict`] when the name is already taken,
    /// including by the caller itself.
    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()>;

    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// Delete every object so the bucket itself can be deleted
    async fn clear_bucket(&self, bucket: &str) -> Result<()>;

    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Tag set in storage order; empty when the bucket carries no tags
    async fn get_tags(&self, bucket: &str) -> Result<Vec<Tag>>;

    /// Replace the whole tag set
    async fn put_tags(&self, bucket: &str, tags: &[Tag]) -> Result<()>;

    async fn put_policy(&self, bucket: &str, policy: &str) -> Result<()>;

    async fn delete_policy(&self, bucket: &str) -> Result<()>;

    /// Enable AES256 default encryption with bucket keys
    async fn put_default_encryption(&self, bucket: &str) -> Result<()>;
}

/// Role operations of the identity API.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Create a role and return its ARN
    async fn create_role(&self, name: &str, trust_policy: &str, tag: &Tag) -> Result<String>;

    async fn delete_role(&self, name: &str) -> Result<()>;
}

fn bucket_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9]$").expect("static bucket name pattern")
    })
}

/// Check a bucket name against the storage API naming rules without calling it.
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(OperatorError::Invalid(format!(
            "bucket name {:?} {}",
            name, reason
        )))
    };

    if !bucket_name_pattern().is_match(name) {
        return invalid(
            "must be 3-63 characters of lowercase letters, digits, dots and hyphens, \
             starting and ending with a letter or digit",
        );
    }
    if name.contains("..") {
        return invalid("must not contain two adjacent periods");
    }
    if name.parse::<Ipv4Addr>().is_ok() {
        return invalid("must not be formatted as an IP address");
    }
    if name.starts_with("xn--") {
        return invalid("can't start with xn--");
    }
    if name.ends_with("-s3alias") {
        return invalid("can't end with -s3alias");
    }
    Ok(())
}
