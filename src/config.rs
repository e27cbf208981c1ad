// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::backoff::BackoffPolicy;
use crate::constants::tags;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const DEFAULT_REGION: &str = "eu-central-1";
const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const DEFAULT_TEMPLATE_CONFIG_MAP: &str = "s3-operator-auth-template";
const MAX_BACKOFF_STEPS: u32 = 20;
const MAX_BACKOFF_FACTOR: f64 = 10.0;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Region used for buckets whose spec does not name one
    pub region: String,
    /// Custom storage/identity endpoint, e.g. localstack
    pub aws_endpoint: Option<Url>,
    pub force_path_style: bool,
    /// Account id placed in role ARNs; empty for account-less ARNs
    pub aws_account_id: String,
    /// Federated principal allowed to assume created roles
    pub oidc_provider_arn: Option<String>,
    /// Namespace prefix for operator-managed bucket tags
    pub tag_prefix: String,
    pub backoff: BackoffPolicy,
    pub auth_server_url: Url,
    pub token_path: PathBuf,
    /// ConfigMap holding the authorization request template
    pub template_config_map: String,
    pub http_timeout: Duration,
    pub requeue_interval: Duration,
    /// Interval of the orphaned bucket sweep; `None` disables it
    pub orphan_sweep_interval: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let auth_server_url = get("AUTH_SERVER_URL")
            .context("AUTH_SERVER_URL environment variable not set")?;
        let auth_server_url = Url::parse(&auth_server_url)
            .with_context(|| format!("AUTH_SERVER_URL is not a valid URL: {}", auth_server_url))?;

        let aws_endpoint = get("AWS_ENDPOINT")
            .map(|e| Url::parse(&e).with_context(|| format!("AWS_ENDPOINT is not a valid URL: {}", e)))
            .transpose()?;

        let tag_prefix = get("TAG_PREFIX").unwrap_or_else(|| tags::DEFAULT_PREFIX.to_string());
        if tag_prefix == tags::OWNERSHIP_KEY {
            bail!("TAG_PREFIX must not equal the ownership tag key");
        }

        let backoff = BackoffPolicy {
            initial: Duration::from_millis(parse_or(&get, "WAIT_BACKOFF_DURATION_MS", 1000u64)?),
            factor: parse_or(&get, "WAIT_BACKOFF_FACTOR", 2.0f64)?,
            steps: parse_or(&get, "WAIT_BACKOFF_STEPS", 5u32)?,
        };
        if !backoff.factor.is_finite() || backoff.factor < 1.0 || backoff.factor > MAX_BACKOFF_FACTOR {
            bail!(
                "WAIT_BACKOFF_FACTOR must be between 1 and {}, got {}",
                MAX_BACKOFF_FACTOR,
                backoff.factor
            );
        }
        if backoff.steps == 0 || backoff.steps > MAX_BACKOFF_STEPS {
            bail!(
                "WAIT_BACKOFF_STEPS must be between 1 and {}, got {}",
                MAX_BACKOFF_STEPS,
                backoff.steps
            );
        }

        let sweep_secs: u64 = parse_or(&get, "ORPHAN_SWEEP_INTERVAL_SECS", 0)?;

        Ok(Config {
            region: get("REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            aws_endpoint,
            force_path_style: parse_or(&get, "AWS_S3_FORCE_PATH_STYLE", false)?,
            aws_account_id: get("AWS_ACCOUNT_ID").unwrap_or_default(),
            oidc_provider_arn: get("OIDC_PROVIDER_ARN"),
            tag_prefix,
            backoff,
            auth_server_url,
            token_path: get("TOKEN_PATH")
                .unwrap_or_else(|| DEFAULT_TOKEN_PATH.to_string())
                .into(),
            template_config_map: get("TEMPLATE_CONFIG_MAP")
                .unwrap_or_else(|| DEFAULT_TEMPLATE_CONFIG_MAP.to_string()),
            http_timeout: Duration::from_secs(parse_or(&get, "TIMEOUT", 5)?),
            requeue_interval: Duration::from_secs(parse_or(&get, "REQUEUE_INTERVAL_SECS", 60)?),
            orphan_sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse {}={}", key, raw)),
        None => Ok(default),
    }
}
