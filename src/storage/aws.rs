// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! S3 and IAM backed implementations of the storage capabilities.

use super::{IdentityApi, StorageApi, Tag};
use crate::config::Config;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::error::{BuildError, DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
    ServerSideEncryption, ServerSideEncryptionByDefault, ServerSideEncryptionConfiguration,
    ServerSideEncryptionRule, Tagging,
};
use tracing::{debug, info};

/// Region whose buckets must not carry a location constraint
const DEFAULT_S3_REGION: &str = "us-east-1";

/// Shared SDK configuration honouring the configured region and endpoint
pub async fn load_sdk_config(config: &Config) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()));
    if let Some(endpoint) = &config.aws_endpoint {
        info!("Using custom AWS endpoint {}", endpoint);
        loader = loader.endpoint_url(endpoint.as_str().trim_end_matches('/'));
    }
    loader.load().await
}

fn transient(operation: &str, target: &str, err: impl std::error::Error) -> OperatorError {
    OperatorError::Transient(format!(
        "{} {} failed: {}",
        operation,
        target,
        DisplayErrorContext(err)
    ))
}

fn invalid_request(err: BuildError) -> OperatorError {
    OperatorError::Invalid(format!("malformed storage request: {}", err))
}

#[derive(Clone)]
pub struct AwsStorage {
    client: aws_sdk_s3::Client,
}

impl AwsStorage {
    pub fn new(sdk_config: &SdkConfig, force_path_style: bool) -> Self {
        let s3_config = aws_sdk_s3::config::Builder::from(sdk_config)
            .force_path_style(force_path_style)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
        }
    }
}

#[async_trait]
impl StorageApi for AwsStorage {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(transient("head bucket", bucket, err))
                }
            }
        }
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if region != DEFAULT_S3_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_bucket_already_exists() || err.is_bucket_already_owned_by_you() {
                    Err(OperatorError::Conflict(format!(
                        "bucket name {} is already taken",
                        bucket
                    )))
                } else {
                    Err(transient("create bucket", bucket, err))
                }
            }
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        match self.client.delete_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = err.into_service_error();
                if err.code() == Some("NoSuchBucket") {
                    Err(OperatorError::not_found("Bucket", bucket))
                } else {
                    Err(transient("delete bucket", bucket, err))
                }
            }
        }
    }

    async fn clear_bucket(&self, bucket: &str) -> Result<()> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| transient("list objects in", bucket, e))?;
            let objects = page
                .contents()
                .iter()
                .filter_map(|object| object.key())
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(invalid_request)?;
            if objects.is_empty() {
                continue;
            }

            debug!("Deleting {} objects from bucket {}", objects.len(), bucket);
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(invalid_request)?;
            self.client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| transient("delete objects in", bucket, e))?;
        }
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| transient("list", "buckets", e))?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .map(str::to_string)
            .collect())
    }

    async fn get_tags(&self, bucket: &str) -> Result<Vec<Tag>> {
        match self.client.get_bucket_tagging().bucket(bucket).send().await {
            Ok(output) => Ok(output
                .tag_set()
                .iter()
                .map(|t| Tag::new(t.key(), t.value()))
                .collect()),
            Err(err) => {
                let err = err.into_service_error();
                if err.code() == Some("NoSuchTagSet") {
                    Ok(Vec::new())
                } else {
                    Err(transient("get tags of", bucket, err))
                }
            }
        }
    }

    async fn put_tags(&self, bucket: &str, tags: &[Tag]) -> Result<()> {
        let tag_set = tags
            .iter()
            .map(|t| {
                aws_sdk_s3::types::Tag::builder()
                    .key(&t.key)
                    .value(&t.value)
                    .build()
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(invalid_request)?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(invalid_request)?;

        self.client
            .put_bucket_tagging()
            .bucket(bucket)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| transient("put tags on", bucket, e))?;
        Ok(())
    }

    async fn put_policy(&self, bucket: &str, policy: &str) -> Result<()> {
        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy)
            .send()
            .await
            .map_err(|e| transient("put policy on", bucket, e))?;
        Ok(())
    }

    async fn delete_policy(&self, bucket: &str) -> Result<()> {
        self.client
            .delete_bucket_policy()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| transient("delete policy of", bucket, e))?;
        Ok(())
    }

    async fn put_default_encryption(&self, bucket: &str) -> Result<()> {
        let by_default = ServerSideEncryptionByDefault::builder()
            .sse_algorithm(ServerSideEncryption::Aes256)
            .build()
            .map_err(invalid_request)?;
        let rule = ServerSideEncryptionRule::builder()
            .apply_server_side_encryption_by_default(by_default)
            .bucket_key_enabled(true)
            .build();
        let configuration = ServerSideEncryptionConfiguration::builder()
            .rules(rule)
            .build()
            .map_err(invalid_request)?;

        self.client
            .put_bucket_encryption()
            .bucket(bucket)
            .server_side_encryption_configuration(configuration)
            .send()
            .await
            .map_err(|e| transient("put encryption on", bucket, e))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct AwsIdentity {
    client: aws_sdk_iam::Client,
}

impl AwsIdentity {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_iam::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl IdentityApi for AwsIdentity {
    async fn create_role(&self, name: &str, trust_policy: &str, tag: &Tag) -> Result<String> {
        let role_tag = aws_sdk_iam::types::Tag::builder()
            .key(&tag.key)
            .value(&tag.value)
            .build()
            .map_err(|e| OperatorError::Invalid(format!("malformed role tag: {}", e)))?;

        match self
            .client
            .create_role()
            .role_name(name)
            .assume_role_policy_document(trust_policy)
            .tags(role_tag)
            .send()
            .await
        {
            Ok(output) => output
                .role()
                .map(|role| role.arn().to_string())
                .ok_or_else(|| OperatorError::Transient(format!("role {} created without ARN", name))),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_entity_already_exists_exception() {
                    Err(OperatorError::Conflict(format!("role {} already exists", name)))
                } else {
                    Err(transient("create role", name, err))
                }
            }
        }
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        match self.client.delete_role().role_name(name).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_no_such_entity_exception() {
                    Err(OperatorError::not_found("Role", name))
                } else {
                    Err(transient("delete role", name, err))
                }
            }
        }
    }
}
