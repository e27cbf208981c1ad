// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Desired state of an S3 bucket. The bucket is named after the resource.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "s3operator.io", version = "v1", kind = "S3Bucket")]
#[kube(namespaced)]
#[kube(status = "S3BucketStatus")]
#[kube(shortname = "s3b")]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketSpec {
    /// Region override; the operator's configured region is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// User tags, stored on the bucket under the operator's tag prefix
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Enable default server-side encryption
    #[serde(default)]
    pub encryption: bool,
    /// Service account the workload uses to reach the bucket
    pub service_account_name: String,
    /// Labels selecting the workload controller bound to the service account
    pub selector: BTreeMap<String, String>,
}

impl S3Bucket {
    /// Name of the backing bucket
    pub fn bucket_name(&self) -> String {
        self.name_any()
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            namespace: self.namespace().unwrap_or_default(),
            name: self.name_any(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<BucketState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BucketState {
    Ready,
    Failed,
}

/// Identifies an S3Bucket resource independently of its current contents
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
