// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster capability and its kube client implementation

use super::workloads::{WorkloadController, WorkloadKind};
use crate::constants::OPERATOR_NAME;
use crate::error::Result;
use crate::types::{ResourceKey, S3Bucket, S3BucketStatus};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Api, Client, ResourceExt,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::{debug, info, instrument};

/// Kubernetes operations the operator depends on.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_bucket(&self, key: &ResourceKey) -> Result<Option<S3Bucket>>;

    async fn list_buckets(&self) -> Result<Vec<S3Bucket>>;

    async fn patch_bucket_status(&self, key: &ResourceKey, status: &S3BucketStatus) -> Result<()>;

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<Option<ServiceAccount>>;

    async fn create_service_account(&self, namespace: &str, sa: &ServiceAccount) -> Result<ServiceAccount>;

    async fn replace_service_account(&self, namespace: &str, sa: &ServiceAccount) -> Result<ServiceAccount>;

    /// Deleting an absent service account succeeds
    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<()>;

    async fn list_workloads(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        label_selector: &str,
    ) -> Result<Vec<WorkloadController>>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;
}

/// [`ClusterApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list<K>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(list.items)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_bucket(&self, key: &ResourceKey) -> Result<Option<S3Bucket>> {
        let api: Api<S3Bucket> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn list_buckets(&self) -> Result<Vec<S3Bucket>> {
        let api: Api<S3Bucket> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    #[instrument(skip(self, status), fields(bucket = %key))]
    async fn patch_bucket_status(&self, key: &ResourceKey, status: &S3BucketStatus) -> Result<()> {
        let api: Api<S3Bucket> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = json!({ "status": status });
        api.patch_status(
            &key.name,
            &PatchParams::apply(OPERATOR_NAME),
            &Patch::Merge(&patch),
        )
        .await?;
        debug!("Patched status of {}", key);
        Ok(())
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<Option<ServiceAccount>> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    #[instrument(skip(self, sa), fields(service_account = %sa.name_any()))]
    async fn create_service_account(&self, namespace: &str, sa: &ServiceAccount) -> Result<ServiceAccount> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let created = api.create(&PostParams::default(), sa).await?;
        info!("Service account {}/{} created", namespace, created.name_any());
        Ok(created)
    }

    #[instrument(skip(self, sa), fields(service_account = %sa.name_any()))]
    async fn replace_service_account(&self, namespace: &str, sa: &ServiceAccount) -> Result<ServiceAccount> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.replace(&sa.name_any(), &PostParams::default(), sa).await?)
    }

    #[instrument(skip(self))]
    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Service account {}/{} deleted", namespace, name);
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                debug!("Service account {}/{} already gone", namespace, name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_workloads(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        label_selector: &str,
    ) -> Result<Vec<WorkloadController>> {
        let controllers = match kind {
            WorkloadKind::Deployment => self
                .list::<Deployment>(namespace, label_selector)
                .await?
                .into_iter()
                .map(WorkloadController::Deployment)
                .collect(),
            WorkloadKind::StatefulSet => self
                .list::<StatefulSet>(namespace, label_selector)
                .await?
                .into_iter()
                .map(WorkloadController::StatefulSet)
                .collect(),
            WorkloadKind::Job => self
                .list::<Job>(namespace, label_selector)
                .await?
                .into_iter()
                .map(WorkloadController::Job)
                .collect(),
            WorkloadKind::DaemonSet => self
                .list::<DaemonSet>(namespace, label_selector)
                .await?
                .into_iter()
                .map(WorkloadController::DaemonSet)
                .collect(),
        };
        Ok(controllers)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
