// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Binds a bucket's role to a workload through its service account.
//!
//! A service account created here is annotated with the role ARN, then
//! verified against the workload controller selected by the bucket, then
//! approved by the authorization server. Any failure after creation deletes
//! the service account again. A pre-existing service account is never deleted.

use super::authorization::{ApprovalRequest, Approver};
use super::template::BodyTemplate;
use crate::backoff::{Attempt, BackoffPolicy, Sleeper};
use crate::config::Config;
use crate::constants::annotations::ROLE_ARN;
use crate::error::{OperatorError, Result};
use crate::kubernetes::{find_matching_controllers, ClusterApi, WorkloadController};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadMatch {
    Unverified,
    Verified,
    Denied,
}

/// A service account carrying a bucket role, and how far its binding got
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceIdentityBinding {
    pub identity_name: String,
    pub namespace: String,
    pub role_arn: String,
    pub workload_match: WorkloadMatch,
    /// The service account was created by this binding
    pub created: bool,
}

impl ServiceIdentityBinding {
    fn new(identity_name: &str, namespace: &str, role_arn: &str) -> Self {
        Self {
            identity_name: identity_name.to_string(),
            namespace: namespace.to_string(),
            role_arn: role_arn.to_string(),
            workload_match: WorkloadMatch::Unverified,
            created: false,
        }
    }
}

#[derive(Clone)]
pub struct WorkloadBinder {
    cluster: Arc<dyn ClusterApi>,
    approver: Arc<dyn Approver>,
    sleeper: Arc<dyn Sleeper>,
    backoff: BackoffPolicy,
    template_config_map: String,
}

impl WorkloadBinder {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        approver: Arc<dyn Approver>,
        sleeper: Arc<dyn Sleeper>,
        config: &Config,
    ) -> Self {
        Self {
            cluster,
            approver,
            sleeper,
            backoff: config.backoff,
            template_config_map: config.template_config_map.clone(),
        }
    }

    #[instrument(skip(self, role_arn, selector))]
    pub async fn bind(
        &self,
        identity: &str,
        namespace: &str,
        role_arn: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<ServiceIdentityBinding> {
        let mut binding = ServiceIdentityBinding::new(identity, namespace, role_arn);

        let result = match self.cluster.get_service_account(namespace, identity).await? {
            None => self.bind_new(&mut binding, selector).await,
            Some(existing) => self.bind_existing(&mut binding, existing, selector).await,
        };

        match result {
            Ok(()) => {
                info!(
                    "Service account {}/{} bound to role {}",
                    namespace, identity, role_arn
                );
                Ok(binding)
            }
            Err(e) => {
                warn!(
                    "Binding service account {}/{} failed ({:?}): {}",
                    namespace, identity, binding.workload_match, e
                );
                Err(e)
            }
        }
    }

    async fn bind_new(
        &self,
        binding: &mut ServiceIdentityBinding,
        selector: &BTreeMap<String, String>,
    ) -> Result<()> {
        info!(
            "Creating service account {}/{}",
            binding.namespace, binding.identity_name
        );
        let sa = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(binding.identity_name.clone()),
                namespace: Some(binding.namespace.clone()),
                annotations: Some(BTreeMap::from([(
                    ROLE_ARN.to_string(),
                    binding.role_arn.clone(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        self.cluster
            .create_service_account(&binding.namespace, &sa)
            .await?;
        binding.created = true;

        let result = self.verify_and_authorize(binding, selector).await;
        if result.is_err() {
            self.rollback(&binding.namespace, &binding.identity_name).await;
        }
        result
    }

    async fn verify_and_authorize(
        &self,
        binding: &mut ServiceIdentityBinding,
        selector: &BTreeMap<String, String>,
    ) -> Result<()> {
        let controller = self.verify(binding, selector).await?;
        self.authorize(binding, &controller).await
    }

    async fn bind_existing(
        &self,
        binding: &mut ServiceIdentityBinding,
        mut existing: ServiceAccount,
        selector: &BTreeMap<String, String>,
    ) -> Result<()> {
        debug!(
            "Service account {}/{} already exists",
            binding.namespace, binding.identity_name
        );
        let controller = self.verify(binding, selector).await?;

        let annotated = match existing.annotations().get(ROLE_ARN) {
            Some(current) if *current == binding.role_arn => true,
            Some(current) => {
                return Err(OperatorError::Conflict(format!(
                    "service account {}/{} is already bound to role {}",
                    binding.namespace, binding.identity_name, current
                )));
            }
            None => false,
        };

        // The annotation is only written once the binding is approved
        self.authorize(binding, &controller).await?;

        if annotated {
            debug!("Role annotation already set");
            return Ok(());
        }
        existing
            .annotations_mut()
            .insert(ROLE_ARN.to_string(), binding.role_arn.clone());
        self.cluster
            .replace_service_account(&binding.namespace, &existing)
            .await?;
        info!(
            "Annotated service account {}/{} with role {}",
            binding.namespace, binding.identity_name, binding.role_arn
        );
        Ok(())
    }

    /// Poll until every controller selected by `selector` runs as the
    /// service account. Returns the first matched controller.
    async fn verify(
        &self,
        binding: &mut ServiceIdentityBinding,
        selector: &BTreeMap<String, String>,
    ) -> Result<WorkloadController> {
        let cluster = self.cluster.as_ref();
        let namespace = binding.namespace.as_str();
        let identity = binding.identity_name.as_str();

        let controller = self
            .backoff
            .run(self.sleeper.as_ref(), "binding verification", move |_| async move {
                let controllers = match find_matching_controllers(cluster, namespace, selector).await {
                    Ok(controllers) => controllers,
                    Err(e) if e.is_retryable() => return Attempt::Retry(e),
                    Err(e) => return Attempt::Abort(e),
                };

                if let Some(other) = controllers
                    .iter()
                    .find(|c| c.service_account_name() != identity)
                {
                    return Attempt::Retry(OperatorError::BindingMismatch(format!(
                        "{} {}/{} runs as service account {} instead of {}",
                        other.kind(),
                        namespace,
                        other.name(),
                        other.service_account_name(),
                        identity
                    )));
                }

                match controllers.into_iter().next() {
                    Some(controller) => Attempt::Done(controller),
                    None => Attempt::Abort(OperatorError::BindingMismatch(format!(
                        "no Deployment, StatefulSet, Job or DaemonSet in {} matches the selector",
                        namespace
                    ))),
                }
            })
            .await?;

        binding.workload_match = WorkloadMatch::Verified;
        info!(
            "{} {} runs as service account {}",
            controller.kind(),
            controller.name(),
            binding.identity_name
        );
        Ok(controller)
    }

    async fn authorize(
        &self,
        binding: &mut ServiceIdentityBinding,
        controller: &WorkloadController,
    ) -> Result<()> {
        let template = self.load_template(&binding.namespace).await?;
        let request = ApprovalRequest {
            identity: binding.identity_name.clone(),
            namespace: binding.namespace.clone(),
            body: template.render(controller)?,
        };

        let approver = self.approver.as_ref();
        let request = &request;
        let result = self
            .backoff
            .run(self.sleeper.as_ref(), "authorization", move |_| async move {
                match approver.submit(request).await {
                    Ok(outcome) if outcome.is_approved() => Attempt::Done(()),
                    Ok(outcome) if outcome.terminal => {
                        Attempt::Abort(OperatorError::AuthorizationDenied {
                            identity: request.identity.clone(),
                            status: outcome.status,
                        })
                    }
                    Ok(outcome) => Attempt::Retry(OperatorError::Transient(format!(
                        "authorization server answered HTTP {}",
                        outcome.status
                    ))),
                    Err(e) if e.is_retryable() => Attempt::Retry(e),
                    Err(e) => Attempt::Abort(e),
                }
            })
            .await;

        if matches!(result, Err(OperatorError::AuthorizationDenied { .. })) {
            binding.workload_match = WorkloadMatch::Denied;
        }
        result
    }

    async fn load_template(&self, namespace: &str) -> Result<BodyTemplate> {
        let config_map = self
            .cluster
            .get_config_map(namespace, &self.template_config_map)
            .await?
            .ok_or_else(|| {
                OperatorError::Configuration(format!(
                    "authorization template config map {}/{} not found",
                    namespace, self.template_config_map
                ))
            })?;

        let template = BodyTemplate::parse(&config_map.data.unwrap_or_default())?;
        if template.is_empty() {
            return Err(OperatorError::Configuration(format!(
                "authorization template config map {}/{} has no fields",
                namespace, self.template_config_map
            )));
        }
        Ok(template)
    }

    async fn rollback(&self, namespace: &str, identity: &str) {
        match self.cluster.delete_service_account(namespace, identity).await {
            Ok(()) => info!("Rolled back service account {}/{}", namespace, identity),
            Err(e) => error!(
                "Failed to roll back service account {}/{}: {}",
                namespace, identity, e
            ),
        }
    }

    /// Undo a successful [`bind`](Self::bind) whose bucket could not be
    /// provisioned. Only a service account created by the binding is deleted.
    pub async fn release(&self, binding: &ServiceIdentityBinding) {
        if binding.created {
            self.rollback(&binding.namespace, &binding.identity_name).await;
        }
    }

    /// Delete the service account if it still carries `role_arn`.
    /// Returns whether it was deleted.
    #[instrument(skip(self, role_arn))]
    pub async fn unbind(&self, identity: &str, namespace: &str, role_arn: &str) -> Result<bool> {
        let Some(sa) = self.cluster.get_service_account(namespace, identity).await? else {
            debug!("Service account {}/{} not found", namespace, identity);
            return Ok(false);
        };

        if sa.annotations().get(ROLE_ARN).map(String::as_str) != Some(role_arn) {
            info!(
                "Service account {}/{} is not bound to role {}, keeping it",
                namespace, identity, role_arn
            );
            return Ok(false);
        }

        self.cluster.delete_service_account(namespace, identity).await?;
        Ok(true)
    }
}
