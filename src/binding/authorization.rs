// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Client for the external authorization server that approves a service
//! account's access to a bucket.

use crate::config::Config;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Header carrying the operator's bearer token
const TOKEN_HEADER: &str = "token";

/// Approval request for one service account
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub identity: String,
    pub namespace: String,
    /// Rendered template fields, sent as a flat JSON object
    pub body: BTreeMap<String, String>,
}

/// Classified response of the authorization server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub status: u16,
    /// The server refused by policy; asking again will not help
    pub terminal: bool,
}

impl ApprovalOutcome {
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            status: status.as_u16(),
            terminal: status == StatusCode::FORBIDDEN,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == StatusCode::OK.as_u16()
    }
}

/// Submits approval requests; one call is one attempt.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn submit(&self, request: &ApprovalRequest) -> Result<ApprovalOutcome>;
}

#[derive(Clone)]
pub struct AuthorizationClient {
    http: reqwest::Client,
    endpoint: Url,
    token_path: PathBuf,
}

impl AuthorizationClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| OperatorError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.auth_server_url.clone(),
            token_path: config.token_path.clone(),
        })
    }

    /// The token is re-read on every request so that rotated tokens are used.
    async fn read_token(&self) -> Result<String> {
        let token = tokio::fs::read_to_string(&self.token_path)
            .await
            .map_err(|e| {
                OperatorError::Transient(format!(
                    "Failed to read token from {}: {}",
                    self.token_path.display(),
                    e
                ))
            })?;
        Ok(token.trim().to_string())
    }
}

#[async_trait]
impl Approver for AuthorizationClient {
    /// Submit a request once and classify the response. Transport failures
    /// are errors; every HTTP status is an outcome.
    #[instrument(skip(self, request), fields(service_account = %request.identity, namespace = %request.namespace))]
    async fn submit(&self, request: &ApprovalRequest) -> Result<ApprovalOutcome> {
        let token = self.read_token().await?;

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(TOKEN_HEADER, token)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| {
                OperatorError::Transient(format!(
                    "Request to authorization server {} failed: {}",
                    self.endpoint, e
                ))
            })?;

        let outcome = ApprovalOutcome::from_status(response.status());
        let body = response.text().await.unwrap_or_default();

        if outcome.is_approved() {
            info!("Authorization server approved service account {}", request.identity);
            debug!("Authorization server response: {}", body);
        } else {
            warn!(
                "Authorization server answered {} for service account {}: {}",
                outcome.status, request.identity, body
            );
        }
        Ok(outcome)
    }
}
