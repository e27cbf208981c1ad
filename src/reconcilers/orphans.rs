// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Periodic removal of operator-owned buckets whose S3Bucket resource is gone.

use super::bucket::BucketReconciler;
use crate::error::Result;
use crate::kubernetes::ClusterApi;
use crate::storage::{OwnershipVerifier, StorageApi};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct OrphanSweeper {
    cluster: Arc<dyn ClusterApi>,
    storage: Arc<dyn StorageApi>,
    verifier: OwnershipVerifier,
    reconciler: BucketReconciler,
    interval: Option<Duration>,
}

impl OrphanSweeper {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        storage: Arc<dyn StorageApi>,
        reconciler: BucketReconciler,
        interval: Option<Duration>,
    ) -> Self {
        Self {
            verifier: OwnershipVerifier::new(storage.clone()),
            cluster,
            storage,
            reconciler,
            interval,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let Some(interval) = self.interval else {
            info!("Orphaned bucket sweep disabled");
            return Ok(());
        };

        info!("Sweeping orphaned buckets every {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(deleted) if deleted.is_empty() => debug!("No orphaned buckets found"),
                Ok(deleted) => info!("Deleted orphaned buckets: {:?}", deleted),
                Err(e) => warn!("Orphaned bucket sweep failed: {}", e),
            }
        }
    }

    /// Delete every owned bucket without a resource. Returns the deleted
    /// bucket names; a failure on one bucket does not stop the sweep.
    pub async fn sweep(&self) -> Result<Vec<String>> {
        // Storage is listed before the resources, so a bucket created after
        // the resource listing can never be mistaken for an orphan.
        let live = self.storage.list_buckets().await?;
        let claimed: HashSet<String> = self
            .cluster
            .list_buckets()
            .await?
            .iter()
            .map(|b| b.bucket_name())
            .collect();

        let mut deleted = Vec::new();
        for name in live.into_iter().filter(|name| !claimed.contains(name)) {
            match self.verifier.is_owned(&name).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!("Could not check ownership of bucket {}: {}", name, e);
                    continue;
                }
            }

            info!("Bucket {} has no S3Bucket resource, deleting it", name);
            match self.reconciler.delete_bucket(&name).await {
                Ok(true) => deleted.push(name),
                Ok(false) => {}
                Err(e) => warn!("Failed to delete orphaned bucket {}: {}", name, e),
            }
        }
        Ok(deleted)
    }
}
