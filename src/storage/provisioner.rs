// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Bucket, role, policy and encryption lifecycle.

use super::{IdentityApi, StorageApi, TagCodec};
use crate::config::Config;
use crate::constants::iam::{POLICY_VERSION, ROLE_NAME_SUFFIX, S3_ARN_PREFIX};
use crate::error::Result;
use crate::types::S3BucketSpec;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Clone)]
pub struct StorageProvisioner {
    storage: Arc<dyn StorageApi>,
    identity: Arc<dyn IdentityApi>,
    codec: TagCodec,
    default_region: String,
    account_id: String,
    oidc_provider_arn: Option<String>,
}

/// Name of the identity role created for a bucket
pub fn role_name(bucket: &str) -> String {
    format!("{}{}", bucket, ROLE_NAME_SUFFIX)
}

impl StorageProvisioner {
    pub fn new(
        storage: Arc<dyn StorageApi>,
        identity: Arc<dyn IdentityApi>,
        config: &Config,
    ) -> Self {
        Self {
            storage,
            identity,
            codec: TagCodec::new(config.tag_prefix.clone()),
            default_region: config.region.clone(),
            account_id: config.aws_account_id.clone(),
            oidc_provider_arn: config.oidc_provider_arn.clone(),
        }
    }

    /// ARN of the role that [`create`](Self::create) provisions for a bucket
    pub fn role_arn(&self, bucket: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, role_name(bucket))
    }

    /// Create a bucket with its tags, role, policy and optional encryption.
    ///
    /// A failure after the bucket was created removes the bucket again, so the
    /// next pass starts from scratch instead of finding a half-provisioned
    /// bucket that the update path would never complete.
    #[instrument(skip(self, spec))]
    pub async fn create(&self, bucket: &str, spec: &S3BucketSpec) -> Result<()> {
        let region = spec.region.as_deref().unwrap_or(&self.default_region);

        info!("Creating bucket {} in region {}", bucket, region);
        self.storage.create_bucket(bucket, region).await?;

        let mut role_created = false;
        let result = self.finish_create(bucket, spec, &mut role_created).await;

        if let Err(e) = &result {
            error!("Provisioning bucket {} failed, rolling back: {}", bucket, e);
            if role_created {
                if let Err(role_err) = self.identity.delete_role(&role_name(bucket)).await {
                    warn!("Rollback of role for bucket {} failed: {}", bucket, role_err);
                }
            }
            if let Err(bucket_err) = self.storage.delete_bucket(bucket).await {
                warn!("Rollback of bucket {} failed: {}", bucket, bucket_err);
            }
        }
        result
    }

    async fn finish_create(
        &self,
        bucket: &str,
        spec: &S3BucketSpec,
        role_created: &mut bool,
    ) -> Result<()> {
        let tags = self.codec.encode(&spec.tags);
        self.storage.put_tags(bucket, &tags).await?;
        info!("Bucket {} tagged with {} tags", bucket, tags.len());

        let role = role_name(bucket);
        let role_arn = self
            .identity
            .create_role(&role, &self.trust_policy(), &TagCodec::ownership_marker())
            .await?;
        *role_created = true;
        info!("Created role {} for bucket {}", role_arn, bucket);

        self.storage
            .put_policy(bucket, &bucket_policy(bucket, &role_arn))
            .await?;
        info!("Attached bucket policy for role {}", role);

        if spec.encryption {
            self.storage.put_default_encryption(bucket).await?;
            info!("Enabled default encryption on bucket {}", bucket);
        }

        Ok(())
    }

    /// Converge the bucket's operator tags. Returns whether tags were written.
    #[instrument(skip(self, desired))]
    pub async fn update_tags(&self, bucket: &str, desired: &BTreeMap<String, String>) -> Result<bool> {
        let live = self.storage.get_tags(bucket).await?;
        let diff = self.codec.diff(desired, &live);

        if diff.changed {
            self.storage.put_tags(bucket, &diff.tags).await?;
            info!("Updated tags on bucket {}", bucket);
        } else {
            info!("No tags to update on bucket {}", bucket);
        }
        Ok(diff.changed)
    }

    /// Empty and delete a bucket, then delete its role.
    ///
    /// The role is deleted even when emptying or deleting the bucket failed; a
    /// role deletion failure is logged and never replaces the bucket error.
    #[instrument(skip(self))]
    pub async fn delete(&self, bucket: &str) -> Result<()> {
        let result = self.delete_bucket_and_content(bucket).await;

        match self.identity.delete_role(&role_name(bucket)).await {
            Ok(()) => info!("Deleted role for bucket {}", bucket),
            Err(e) if e.is_not_found() => info!("Role for bucket {} already gone", bucket),
            Err(e) => warn!("Failed to delete role for bucket {}: {}", bucket, e),
        }

        result
    }

    async fn delete_bucket_and_content(&self, bucket: &str) -> Result<()> {
        // Revoke role access first so nothing is written while emptying
        if let Err(e) = self.storage.delete_policy(bucket).await {
            warn!("Failed to delete policy of bucket {}: {}", bucket, e);
        }
        self.storage.clear_bucket(bucket).await?;
        info!("Emptied bucket {}", bucket);
        self.storage.delete_bucket(bucket).await?;
        info!("Deleted bucket {}", bucket);
        Ok(())
    }

    fn trust_policy(&self) -> String {
        let statement = match &self.oidc_provider_arn {
            Some(provider) => json!({
                "Effect": "Allow",
                "Principal": { "Federated": provider },
                "Action": "sts:AssumeRoleWithWebIdentity",
            }),
            None => json!({
                "Effect": "Allow",
                "Principal": { "Service": "pods.eks.amazonaws.com" },
                "Action": ["sts:AssumeRole", "sts:TagSession"],
            }),
        };
        json!({ "Version": POLICY_VERSION, "Statement": [statement] }).to_string()
    }
}

/// Bucket policy granting a role full access to the bucket and its objects
pub fn bucket_policy(bucket: &str, role_arn: &str) -> String {
    let sid: String = bucket.chars().filter(char::is_ascii_alphanumeric).collect();
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Sid": format!("AllowRole{}", sid),
            "Effect": "Allow",
            "Principal": { "AWS": role_arn },
            "Action": ["s3:*"],
            "Resource": [
                format!("{}{}", S3_ARN_PREFIX, bucket),
                format!("{}{}/*", S3_ARN_PREFIX, bucket),
            ],
        }],
    })
    .to_string()
}
