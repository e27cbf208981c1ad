// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use s3_operator::backoff::{Sleeper, TokioSleeper};
use s3_operator::binding::{Approver, AuthorizationClient, WorkloadBinder};
use s3_operator::config::Config;
use s3_operator::kubernetes::{wait_for_bucket_crd, ClusterApi, KubeCluster};
use s3_operator::reconcilers::{BucketController, BucketReconciler, OrphanSweeper};
use s3_operator::storage::aws::load_sdk_config;
use s3_operator::storage::{AwsIdentity, AwsStorage, IdentityApi, StorageApi, StorageProvisioner};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting S3 operator");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: region={}, auth_server={}, tag_prefix={}",
        config.region, config.auth_server_url, config.tag_prefix
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for S3Bucket CRD to become available...");
    wait_for_bucket_crd(&client).await?;

    let sdk_config = load_sdk_config(&config).await;
    let storage: Arc<dyn StorageApi> = Arc::new(AwsStorage::new(&sdk_config, config.force_path_style));
    let identity: Arc<dyn IdentityApi> = Arc::new(AwsIdentity::new(&sdk_config));

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client.clone()));
    let approver: Arc<dyn Approver> = Arc::new(AuthorizationClient::new(&config)?);
    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);

    let reconciler = BucketReconciler::new(
        cluster.clone(),
        storage.clone(),
        StorageProvisioner::new(storage.clone(), identity, &config),
        WorkloadBinder::new(cluster.clone(), approver, sleeper, &config),
    );

    let controller = BucketController::new(client, reconciler.clone(), config.requeue_interval);
    let sweeper = OrphanSweeper::new(cluster, storage, reconciler, config.orphan_sweep_interval);

    info!("Starting reconcilers...");

    tokio::try_join!(controller.run(), sweeper.run())?;

    // The controller runs until its watch stream ends
    warn!("Bucket controller stopped unexpectedly");
    Ok(())
}
