// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Workload controllers that can be bound to a service account.

use super::ClusterApi;
use crate::error::{OperatorError, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PodSpec;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, instrument};

/// Service account pods run as when their spec names none
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    Job,
    DaemonSet,
}

impl WorkloadKind {
    /// Probe order used when looking for the controller behind a selector
    pub const ALL: [WorkloadKind; 4] = [
        WorkloadKind::Deployment,
        WorkloadKind::StatefulSet,
        WorkloadKind::Job,
        WorkloadKind::DaemonSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::Job => "Job",
            WorkloadKind::DaemonSet => "DaemonSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A controller object whose pod template decides which service account
/// its pods run as.
#[derive(Clone, Debug)]
pub enum WorkloadController {
    Deployment(Deployment),
    StatefulSet(StatefulSet),
    Job(Job),
    DaemonSet(DaemonSet),
}

impl WorkloadController {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            WorkloadController::Deployment(_) => WorkloadKind::Deployment,
            WorkloadController::StatefulSet(_) => WorkloadKind::StatefulSet,
            WorkloadController::Job(_) => WorkloadKind::Job,
            WorkloadController::DaemonSet(_) => WorkloadKind::DaemonSet,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            WorkloadController::Deployment(o) => &o.metadata,
            WorkloadController::StatefulSet(o) => &o.metadata,
            WorkloadController::Job(o) => &o.metadata,
            WorkloadController::DaemonSet(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    /// Pod spec of the controller's template
    pub fn pod_spec(&self) -> Option<&PodSpec> {
        match self {
            WorkloadController::Deployment(o) => o.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            WorkloadController::StatefulSet(o) => o.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            WorkloadController::Job(o) => o.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            WorkloadController::DaemonSet(o) => o.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
        }
    }

    /// Service account the controller's pods run as
    pub fn service_account_name(&self) -> &str {
        self.pod_spec()
            .and_then(|spec| {
                spec.service_account_name
                    .as_deref()
                    .or(spec.service_account.as_deref())
            })
            .unwrap_or(DEFAULT_SERVICE_ACCOUNT)
    }

    /// Desired replicas, `None` for kinds without a replica count
    pub fn replicas(&self) -> Option<i32> {
        match self {
            WorkloadController::Deployment(o) => {
                Some(o.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1))
            }
            WorkloadController::StatefulSet(o) => {
                Some(o.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1))
            }
            WorkloadController::Job(_) | WorkloadController::DaemonSet(_) => None,
        }
    }

    /// Whether the object is live rather than being torn down
    pub fn is_active(&self) -> bool {
        self.metadata().deletion_timestamp.is_none()
    }
}

/// Render a label map as a Kubernetes label selector
pub fn label_selector(selector: &BTreeMap<String, String>) -> Result<String> {
    if selector.is_empty() {
        return Err(OperatorError::Invalid(
            "selector must contain at least one label".to_string(),
        ));
    }
    Ok(selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(","))
}

/// Find the active controllers selected by `selector`.
///
/// Kinds are probed in [`WorkloadKind::ALL`] order and the first kind with at
/// least one active object wins. An empty result means no kind matched.
#[instrument(skip(cluster, selector))]
pub async fn find_matching_controllers(
    cluster: &dyn ClusterApi,
    namespace: &str,
    selector: &BTreeMap<String, String>,
) -> Result<Vec<WorkloadController>> {
    let label_selector = label_selector(selector)?;

    for kind in WorkloadKind::ALL {
        let active: Vec<_> = cluster
            .list_workloads(namespace, kind, &label_selector)
            .await?
            .into_iter()
            .filter(WorkloadController::is_active)
            .collect();
        if !active.is_empty() {
            debug!(
                "Selector {} matched {} {} object(s)",
                label_selector,
                active.len(),
                kind
            );
            return Ok(active);
        }
    }

    debug!("Selector {} matched no workload controller", label_selector);
    Ok(Vec::new())
}
