// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mock Kubernetes API service and in-memory fakes of the
//! storage, identity, cluster and authorization capabilities.

use crate::backoff::{BackoffPolicy, Sleeper};
use crate::binding::{ApprovalOutcome, ApprovalRequest, Approver};
use crate::config::Config;
use crate::error::{OperatorError, Result};
use crate::kubernetes::{ClusterApi, WorkloadController, WorkloadKind};
use crate::storage::{IdentityApi, StorageApi, Tag};
use crate::types::{ResourceKey, S3Bucket, S3BucketSpec, S3BucketStatus};
use async_trait::async_trait;
use http::{Request, Response};
use http_body_util::BodyExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec, PodTemplateSpec, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::client::Body;
use kube::{Client, ResourceExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A request received by [`MockService`]
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub body: String,
}

/// A mock HTTP service that returns predefined responses based on request paths
/// and records every request it receives.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for POST requests matching the exact path
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    /// Add a response for PATCH requests matching the exact path
    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "https://kubernetes.default.svc")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        // Prefix match for paths like /api/v1/namespaces/foo
        for ((m, p), resp) in responses.iter() {
            if m == method && path.starts_with(p) {
                return Some(resp.clone());
            }
        }

        None
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or_default().to_string();

        let response = self.find_response(&method, &path);
        let requests = self.requests.clone();

        Box::pin(async move {
            let body = req
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            requests.lock().unwrap().push(RecordedRequest {
                method,
                path,
                query,
                body: String::from_utf8_lossy(&body).into_owned(),
            });

            let (status, body) = response.unwrap_or_else(|| (404, not_found_json("resource", "unknown")));
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

/// Tracks calls per operation and injects failures into chosen ones.
#[derive(Default)]
struct CallLog {
    failing: HashSet<String>,
    calls: HashMap<String, usize>,
}

impl CallLog {
    fn enter(&mut self, op: &str) -> Result<()> {
        *self.calls.entry(op.to_string()).or_default() += 1;
        if self.failing.contains(op) {
            return Err(OperatorError::Transient(format!("injected failure in {}", op)));
        }
        Ok(())
    }

    fn count(&self, op: &str) -> usize {
        self.calls.get(op).copied().unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default)]
struct FakeBucket {
    region: String,
    tags: Vec<Tag>,
    policy: Option<String>,
    encrypted: bool,
    objects: Vec<String>,
}

#[derive(Default)]
struct StorageState {
    buckets: BTreeMap<String, FakeBucket>,
    log: CallLog,
}

/// In-memory [`StorageApi`]
#[derive(Clone, Default)]
pub struct FakeStorage {
    state: Arc<Mutex<StorageState>>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, name: &str, tags: Vec<Tag>) -> Self {
        self.state.lock().unwrap().buckets.insert(
            name.to_string(),
            FakeBucket {
                region: "eu-central-1".to_string(),
                tags,
                ..Default::default()
            },
        );
        self
    }

    pub fn with_objects(self, name: &str, keys: &[&str]) -> Self {
        if let Some(bucket) = self.state.lock().unwrap().buckets.get_mut(name) {
            bucket.objects.extend(keys.iter().map(|k| k.to_string()));
        }
        self
    }

    pub fn failing_on(self, op: &str) -> Self {
        self.state.lock().unwrap().log.failing.insert(op.to_string());
        self
    }

    fn bucket<T>(&self, name: &str, f: impl FnOnce(&FakeBucket) -> T) -> Option<T> {
        self.state.lock().unwrap().buckets.get(name).map(f)
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.state.lock().unwrap().buckets.keys().cloned().collect()
    }

    pub fn region_of(&self, name: &str) -> Option<String> {
        self.bucket(name, |b| b.region.clone())
    }

    pub fn tags_of(&self, name: &str) -> Option<Vec<Tag>> {
        self.bucket(name, |b| b.tags.clone())
    }

    pub fn policy_of(&self, name: &str) -> Option<String> {
        self.bucket(name, |b| b.policy.clone()).flatten()
    }

    pub fn is_encrypted(&self, name: &str) -> bool {
        self.bucket(name, |b| b.encrypted).unwrap_or_default()
    }

    pub fn object_count(&self, name: &str) -> usize {
        self.bucket(name, |b| b.objects.len()).unwrap_or_default()
    }

    pub fn put_tags_calls(&self) -> usize {
        self.state.lock().unwrap().log.count("put_tags")
    }

    pub fn delete_bucket_calls(&self) -> usize {
        self.state.lock().unwrap().log.count("delete_bucket")
    }

    fn with_state<T>(
        &self,
        op: &str,
        bucket: &str,
        f: impl FnOnce(&mut FakeBucket) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        state.log.enter(op)?;
        match state.buckets.get_mut(bucket) {
            Some(b) => f(b),
            None => Err(OperatorError::not_found("Bucket", bucket)),
        }
    }
}

#[async_trait]
impl StorageApi for FakeStorage {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("bucket_exists")?;
        Ok(state.buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("create_bucket")?;
        if state.buckets.contains_key(bucket) {
            return Err(OperatorError::Conflict(format!("bucket {} exists", bucket)));
        }
        state.buckets.insert(
            bucket.to_string(),
            FakeBucket {
                region: region.to_string(),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("delete_bucket")?;
        let empty = state.buckets.get(bucket).map(|b| b.objects.is_empty());
        match empty {
            None => Err(OperatorError::not_found("Bucket", bucket)),
            Some(false) => Err(OperatorError::Transient(format!(
                "bucket {} is not empty",
                bucket
            ))),
            Some(true) => {
                state.buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn clear_bucket(&self, bucket: &str) -> Result<()> {
        self.with_state("clear_bucket", bucket, |b| {
            b.objects.clear();
            Ok(())
        })
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("list_buckets")?;
        Ok(state.buckets.keys().cloned().collect())
    }

    async fn get_tags(&self, bucket: &str) -> Result<Vec<Tag>> {
        self.with_state("get_tags", bucket, |b| Ok(b.tags.clone()))
    }

    async fn put_tags(&self, bucket: &str, tags: &[Tag]) -> Result<()> {
        self.with_state("put_tags", bucket, |b| {
            b.tags = tags.to_vec();
            Ok(())
        })
    }

    async fn put_policy(&self, bucket: &str, policy: &str) -> Result<()> {
        self.with_state("put_policy", bucket, |b| {
            b.policy = Some(policy.to_string());
            Ok(())
        })
    }

    async fn delete_policy(&self, bucket: &str) -> Result<()> {
        self.with_state("delete_policy", bucket, |b| {
            b.policy = None;
            Ok(())
        })
    }

    async fn put_default_encryption(&self, bucket: &str) -> Result<()> {
        self.with_state("put_default_encryption", bucket, |b| {
            b.encrypted = true;
            Ok(())
        })
    }
}

#[derive(Default)]
struct IdentityState {
    roles: BTreeMap<String, Tag>,
    log: CallLog,
}

/// In-memory [`IdentityApi`]
#[derive(Clone, Default)]
pub struct FakeIdentity {
    state: Arc<Mutex<IdentityState>>,
}

impl FakeIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .roles
            .insert(name.to_string(), crate::storage::TagCodec::ownership_marker());
        self
    }

    pub fn failing_on(self, op: &str) -> Self {
        self.state.lock().unwrap().log.failing.insert(op.to_string());
        self
    }

    pub fn role_names(&self) -> Vec<String> {
        self.state.lock().unwrap().roles.keys().cloned().collect()
    }

    pub fn role_tag(&self, name: &str) -> Option<Tag> {
        self.state.lock().unwrap().roles.get(name).cloned()
    }
}

#[async_trait]
impl IdentityApi for FakeIdentity {
    async fn create_role(&self, name: &str, _trust_policy: &str, tag: &Tag) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("create_role")?;
        if state.roles.contains_key(name) {
            return Err(OperatorError::Conflict(format!("role {} exists", name)));
        }
        state.roles.insert(name.to_string(), tag.clone());
        Ok(format!("arn:aws:iam::123456789012:role/{}", name))
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("delete_role")?;
        state
            .roles
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| OperatorError::not_found("Role", name))
    }
}

#[derive(Default)]
struct ClusterState {
    buckets: BTreeMap<ResourceKey, S3Bucket>,
    service_accounts: BTreeMap<(String, String), ServiceAccount>,
    config_maps: BTreeMap<(String, String), ConfigMap>,
    workloads: Vec<WorkloadController>,
    status_patches: usize,
    log: CallLog,
}

/// In-memory [`ClusterApi`]
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, bucket: S3Bucket) -> Self {
        self.state.lock().unwrap().buckets.insert(bucket.key(), bucket);
        self
    }

    pub fn with_workload(self, controller: WorkloadController) -> Self {
        self.state.lock().unwrap().workloads.push(controller);
        self
    }

    pub fn with_service_account(self, namespace: &str, name: &str, role_arn: Option<&str>) -> Self {
        let sa = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                annotations: role_arn.map(|arn| {
                    BTreeMap::from([(
                        crate::constants::annotations::ROLE_ARN.to_string(),
                        arn.to_string(),
                    )])
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .service_accounts
            .insert((namespace.to_string(), name.to_string()), sa);
        self
    }

    pub fn with_config_map(self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .config_maps
            .insert((namespace.to_string(), name.to_string()), cm);
        self
    }

    pub fn failing_on(self, op: &str) -> Self {
        self.state.lock().unwrap().log.failing.insert(op.to_string());
        self
    }

    pub fn service_account(&self, namespace: &str, name: &str) -> Option<ServiceAccount> {
        self.state
            .lock()
            .unwrap()
            .service_accounts
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn status_of(&self, namespace: &str, name: &str) -> Option<S3BucketStatus> {
        self.state
            .lock()
            .unwrap()
            .buckets
            .get(&ResourceKey::new(namespace, name))
            .and_then(|b| b.status.clone())
    }

    pub fn status_patches(&self) -> usize {
        self.state.lock().unwrap().status_patches
    }
}

fn selector_matches(selector: &str, controller: &WorkloadController) -> bool {
    selector.split(',').all(|pair| match pair.split_once('=') {
        Some((key, value)) => controller.label(key) == Some(value),
        None => false,
    })
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_bucket(&self, key: &ResourceKey) -> Result<Option<S3Bucket>> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("get_bucket")?;
        Ok(state.buckets.get(key).cloned())
    }

    async fn list_buckets(&self) -> Result<Vec<S3Bucket>> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("list_buckets")?;
        Ok(state.buckets.values().cloned().collect())
    }

    async fn patch_bucket_status(&self, key: &ResourceKey, status: &S3BucketStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("patch_bucket_status")?;
        state.status_patches += 1;
        let bucket = state
            .buckets
            .get_mut(key)
            .ok_or_else(|| OperatorError::not_found("S3Bucket", key.to_string()))?;
        bucket.status = Some(status.clone());
        Ok(())
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<Option<ServiceAccount>> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("get_service_account")?;
        Ok(state
            .service_accounts
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_service_account(&self, namespace: &str, sa: &ServiceAccount) -> Result<ServiceAccount> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("create_service_account")?;
        let key = (namespace.to_string(), sa.name_any());
        if state.service_accounts.contains_key(&key) {
            return Err(OperatorError::Conflict(format!("service account {} exists", sa.name_any())));
        }
        state.service_accounts.insert(key, sa.clone());
        Ok(sa.clone())
    }

    async fn replace_service_account(&self, namespace: &str, sa: &ServiceAccount) -> Result<ServiceAccount> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("replace_service_account")?;
        let key = (namespace.to_string(), sa.name_any());
        if !state.service_accounts.contains_key(&key) {
            return Err(OperatorError::not_found("ServiceAccount", sa.name_any()));
        }
        state.service_accounts.insert(key, sa.clone());
        Ok(sa.clone())
    }

    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("delete_service_account")?;
        state
            .service_accounts
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_workloads(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        label_selector: &str,
    ) -> Result<Vec<WorkloadController>> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("list_workloads")?;
        Ok(state
            .workloads
            .iter()
            .filter(|c| c.kind() == kind && c.namespace() == namespace)
            .filter(|c| selector_matches(label_selector, c))
            .cloned()
            .collect())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let mut state = self.state.lock().unwrap();
        state.log.enter("get_config_map")?;
        Ok(state
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

#[derive(Default)]
struct ApproverState {
    calls: usize,
    last_body: Option<BTreeMap<String, String>>,
}

/// [`Approver`] answering with a scripted sequence of HTTP statuses; the last
/// status repeats once the script is exhausted.
#[derive(Clone)]
pub struct FakeApprover {
    statuses: Arc<Vec<u16>>,
    state: Arc<Mutex<ApproverState>>,
}

impl FakeApprover {
    pub fn new(statuses: &[u16]) -> Self {
        Self {
            statuses: Arc::new(statuses.to_vec()),
            state: Arc::new(Mutex::new(ApproverState::default())),
        }
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn last_body(&self) -> Option<BTreeMap<String, String>> {
        self.state.lock().unwrap().last_body.clone()
    }
}

#[async_trait]
impl Approver for FakeApprover {
    async fn submit(&self, request: &ApprovalRequest) -> Result<ApprovalOutcome> {
        let mut state = self.state.lock().unwrap();
        let index = state.calls.min(self.statuses.len().saturating_sub(1));
        state.calls += 1;
        state.last_body = Some(request.body.clone());
        let status = self.statuses.get(index).copied().unwrap_or(200);
        Ok(ApprovalOutcome::from_status(
            reqwest::StatusCode::from_u16(status).unwrap(),
        ))
    }
}

/// [`Sleeper`] that records requested waits instead of sleeping
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    recorded: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.recorded.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.recorded.lock().unwrap().push(duration);
    }
}

pub fn make_config() -> Config {
    Config {
        region: "eu-central-1".to_string(),
        aws_endpoint: None,
        force_path_style: false,
        aws_account_id: "123456789012".to_string(),
        oidc_provider_arn: None,
        tag_prefix: "s3operator/".to_string(),
        backoff: BackoffPolicy {
            initial: Duration::from_millis(100),
            factor: 2.0,
            steps: 3,
        },
        auth_server_url: url::Url::parse("http://auth.local/approve").unwrap(),
        token_path: "/var/run/secrets/kubernetes.io/serviceaccount/token".into(),
        template_config_map: "s3-operator-auth-template".to_string(),
        http_timeout: Duration::from_secs(5),
        requeue_interval: Duration::from_secs(60),
        orphan_sweep_interval: None,
    }
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn make_pod_template(name: &str, pod_labels: &[(&str, &str)], service_account: Option<&str>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels(pod_labels)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: service_account.map(str::to_string),
            containers: vec![Container {
                name: name.to_string(),
                image: Some("nginx:1.27".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

fn make_meta(namespace: &str, name: &str, object_labels: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels(object_labels)),
        ..Default::default()
    }
}

pub fn make_deployment(
    namespace: &str,
    name: &str,
    object_labels: &[(&str, &str)],
    service_account: Option<&str>,
) -> WorkloadController {
    WorkloadController::Deployment(Deployment {
        metadata: make_meta(namespace, name, object_labels),
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels(object_labels)),
                ..Default::default()
            },
            template: make_pod_template(name, object_labels, service_account),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn make_job(
    namespace: &str,
    name: &str,
    object_labels: &[(&str, &str)],
    service_account: Option<&str>,
) -> WorkloadController {
    WorkloadController::Job(Job {
        metadata: make_meta(namespace, name, object_labels),
        spec: Some(JobSpec {
            template: make_pod_template(name, object_labels, service_account),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// An S3Bucket bound to service account `app-sa` and selector `app=web`
pub fn make_bucket(namespace: &str, name: &str, tags: &[(&str, &str)]) -> S3Bucket {
    let mut bucket = S3Bucket::new(
        name,
        S3BucketSpec {
            region: None,
            tags: labels(tags),
            encryption: false,
            service_account_name: "app-sa".to_string(),
            selector: labels(&[("app", "web")]),
        },
    );
    bucket.metadata.namespace = Some(namespace.to_string());
    bucket.metadata.generation = Some(1);
    bucket
}
