// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Bucket reconciler - drives a bucket, its role and its service account
//! towards an S3Bucket resource.

use crate::binding::WorkloadBinder;
use crate::constants::FINALIZER;
use crate::error::{ErrorKind, OperatorError, Result};
use crate::kubernetes::ClusterApi;
use crate::storage::{validate_bucket_name, OwnershipVerifier, StorageApi, StorageProvisioner};
use crate::types::{BucketState, ResourceKey, S3Bucket, S3BucketStatus};
use futures::StreamExt;
use kube::{
    runtime::{
        controller::Action,
        finalizer::{finalizer, Event as FinalizerEvent},
        Controller,
    },
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of one reconcile pass
#[derive(Debug)]
pub struct Reconciliation {
    /// Whether the key should be delivered again
    pub requeue: bool,
    pub result: Result<()>,
}

impl Reconciliation {
    fn from_result(result: Result<()>) -> Self {
        Self {
            requeue: result.is_err(),
            result,
        }
    }
}

#[derive(Clone)]
pub struct BucketReconciler {
    cluster: Arc<dyn ClusterApi>,
    storage: Arc<dyn StorageApi>,
    verifier: OwnershipVerifier,
    provisioner: StorageProvisioner,
    binder: WorkloadBinder,
}

impl BucketReconciler {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        storage: Arc<dyn StorageApi>,
        provisioner: StorageProvisioner,
        binder: WorkloadBinder,
    ) -> Self {
        Self {
            verifier: OwnershipVerifier::new(storage.clone()),
            cluster,
            storage,
            provisioner,
            binder,
        }
    }

    /// Reconcile the resource behind `key` once. Never retries internally.
    #[instrument(skip(self), fields(bucket = %key))]
    pub async fn reconcile(&self, key: &ResourceKey) -> Reconciliation {
        let bucket = match self.cluster.get_bucket(key).await {
            Ok(Some(bucket)) => bucket,
            Ok(None) => {
                debug!("S3Bucket {} not found, deleting its bucket", key);
                return match self.delete_bucket(&key.name).await {
                    Ok(deleted) => Reconciliation {
                        requeue: !deleted,
                        result: Ok(()),
                    },
                    Err(e) => Reconciliation::from_result(Err(e)),
                };
            }
            Err(e) => return Reconciliation::from_result(Err(e)),
        };

        let result = self.apply(&bucket).await;
        match &result {
            Ok(()) => info!("S3Bucket {} reconciled", key),
            Err(e) => warn!("S3Bucket {} failed to reconcile: {}", key, e),
        }
        self.record_status(&bucket, &result).await;
        Reconciliation::from_result(result)
    }

    async fn apply(&self, bucket: &S3Bucket) -> Result<()> {
        let name = bucket.bucket_name();
        if self.storage.bucket_exists(&name).await? {
            self.update(bucket).await
        } else {
            self.create(bucket).await
        }
    }

    async fn create(&self, bucket: &S3Bucket) -> Result<()> {
        let name = bucket.bucket_name();
        let namespace = bucket.namespace().unwrap_or_default();
        validate_bucket_name(&name)?;

        let role_arn = self.provisioner.role_arn(&name);
        let binding = self
            .binder
            .bind(
                &bucket.spec.service_account_name,
                &namespace,
                &role_arn,
                &bucket.spec.selector,
            )
            .await?;

        if let Err(e) = self.provisioner.create(&name, &bucket.spec).await {
            self.binder.release(&binding).await;
            return Err(e);
        }
        Ok(())
    }

    /// Only tags are converged on an existing bucket. Region, encryption and
    /// binding changes to the resource are not applied.
    async fn update(&self, bucket: &S3Bucket) -> Result<()> {
        let name = bucket.bucket_name();
        if !self.verifier.is_owned(&name).await? {
            return Err(OperatorError::Unmanaged(name));
        }
        self.provisioner.update_tags(&name, &bucket.spec.tags).await?;
        Ok(())
    }

    /// Delete an operator-owned bucket with its content and role.
    ///
    /// Returns `true` once the bucket is gone, including when it never
    /// existed. An existing bucket without the ownership marker is refused
    /// before anything is touched.
    #[instrument(skip(self))]
    pub async fn delete_bucket(&self, name: &str) -> Result<bool> {
        let live = self.verifier.observe(name).await?;
        if !live.exists {
            debug!("Bucket {} does not exist", name);
            return Ok(true);
        }
        if !live.is_operator_owned {
            return Err(OperatorError::Unmanaged(name.to_string()));
        }

        self.provisioner.delete(name).await?;
        info!("Bucket {} deleted", name);
        Ok(true)
    }

    /// Finalizer cleanup for a resource being deleted.
    ///
    /// An unmanaged bucket is left in place and does not block the deletion
    /// of the resource.
    #[instrument(skip(self, bucket), fields(bucket = %bucket.key()))]
    pub async fn cleanup(&self, bucket: &S3Bucket) -> Result<()> {
        let name = bucket.bucket_name();
        let namespace = bucket.namespace().unwrap_or_default();

        match self.delete_bucket(&name).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Unmanaged => {
                warn!("Bucket {} is not managed by the operator, leaving it in place", name);
            }
            Err(e) => return Err(e),
        }

        let role_arn = self.provisioner.role_arn(&name);
        if self
            .binder
            .unbind(&bucket.spec.service_account_name, &namespace, &role_arn)
            .await?
        {
            info!(
                "Service account {}/{} released",
                namespace, bucket.spec.service_account_name
            );
        }
        Ok(())
    }

    /// Persistent failures mark the resource failed; transient ones leave
    /// the status alone. Unchanged statuses are not written.
    async fn record_status(&self, bucket: &S3Bucket, result: &Result<()>) {
        let (state, message) = match result {
            Ok(()) => (BucketState::Ready, None),
            Err(e) if e.is_retryable() => return,
            Err(e) => (BucketState::Failed, Some(e.to_string())),
        };
        let status = S3BucketStatus {
            state: Some(state),
            message,
            observed_generation: bucket.metadata.generation,
        };
        if bucket.status.as_ref() == Some(&status) {
            return;
        }

        if let Err(e) = self.cluster.patch_bucket_status(&bucket.key(), &status).await {
            warn!("Failed to update status of {}: {}", bucket.key(), e);
        }
    }
}

/// Runs the [`BucketReconciler`] for every S3Bucket in the cluster.
pub struct BucketController {
    client: Client,
    reconciler: BucketReconciler,
    requeue_interval: Duration,
}

impl BucketController {
    pub fn new(client: Client, reconciler: BucketReconciler, requeue_interval: Duration) -> Self {
        Self {
            client,
            reconciler,
            requeue_interval,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let buckets: Api<S3Bucket> = Api::all(self.client.clone());
        let context = Arc::new(self);

        Controller::new(buckets, WatcherConfig::default())
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled bucket: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    async fn apply(&self, bucket: &S3Bucket) -> Result<Action> {
        let outcome = self.reconciler.reconcile(&bucket.key()).await;
        outcome.result?;
        Ok(if outcome.requeue {
            Action::requeue(self.requeue_interval)
        } else {
            Action::await_change()
        })
    }
}

async fn reconcile(bucket: Arc<S3Bucket>, ctx: Arc<BucketController>) -> Result<Action> {
    let namespace = bucket.namespace().unwrap_or_default();
    let buckets: Api<S3Bucket> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&buckets, FINALIZER, bucket, |event| async {
        match event {
            FinalizerEvent::Apply(bucket) => ctx.apply(&bucket).await,
            FinalizerEvent::Cleanup(bucket) => {
                ctx.reconciler.cleanup(&bucket).await?;
                Ok(Action::await_change())
            }
        }
    })
    .await
    .map_err(|e| OperatorError::FinalizerError(Box::new(e)))
}

fn error_policy(bucket: Arc<S3Bucket>, error: &OperatorError, ctx: Arc<BucketController>) -> Action {
    error!("Reconciliation of {} failed: {}", bucket.key(), error);
    Action::requeue(ctx.requeue_interval)
}
