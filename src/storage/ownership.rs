// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Decides whether the operator may mutate a live bucket.

use super::{StorageApi, Tag, TagCodec};
use crate::error::Result;
use std::sync::Arc;
use tracing::{info, instrument};

/// Snapshot of a bucket as observed during one reconcile pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveBucketState {
    pub exists: bool,
    pub tag_set: Vec<Tag>,
    pub is_operator_owned: bool,
}

impl LiveBucketState {
    pub fn absent() -> Self {
        Self {
            exists: false,
            tag_set: Vec::new(),
            is_operator_owned: false,
        }
    }

    pub fn from_tags(tag_set: Vec<Tag>) -> Self {
        Self {
            exists: true,
            is_operator_owned: TagCodec::is_owned(&tag_set),
            tag_set,
        }
    }
}

#[derive(Clone)]
pub struct OwnershipVerifier {
    storage: Arc<dyn StorageApi>,
}

impl OwnershipVerifier {
    pub fn new(storage: Arc<dyn StorageApi>) -> Self {
        Self { storage }
    }

    /// Read a bucket's existence and tags. Errors are propagated so that
    /// "not owned" is never confused with "could not tell".
    #[instrument(skip(self))]
    pub async fn observe(&self, bucket: &str) -> Result<LiveBucketState> {
        if !self.storage.bucket_exists(bucket).await? {
            return Ok(LiveBucketState::absent());
        }
        let tags = self.storage.get_tags(bucket).await?;
        Ok(LiveBucketState::from_tags(tags))
    }

    #[instrument(skip(self))]
    pub async fn is_owned(&self, bucket: &str) -> Result<bool> {
        let tags = self.storage.get_tags(bucket).await?;
        let owned = TagCodec::is_owned(&tags);
        if !owned {
            info!("Bucket {} is not managed by the operator", bucket);
        }
        Ok(owned)
    }
}
