// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("{resource} \"{name}\" not found")]
    NotFound { resource: &'static str, name: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bucket {0} is not managed by the operator")]
    Unmanaged(String),

    #[error("Service account binding mismatch: {0}")]
    BindingMismatch(String),

    #[error("Authorization server denied service account {identity} (HTTP {status})")]
    AuthorizationDenied { identity: String, status: u16 },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("{operation} gave up after {attempts} attempts: {last}")]
    BackoffExhausted {
        operation: String,
        attempts: u32,
        last: Box<OperatorError>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid resource: {0}")]
    Invalid(String),

    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<OperatorError>>),
}

/// Structural classification of an [`OperatorError`], used for control flow
/// instead of matching on error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Unmanaged,
    BindingMismatch,
    AuthorizationDenied,
    Transient,
    Configuration,
    Invalid,
}

impl OperatorError {
    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        OperatorError::NotFound {
            resource,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OperatorError::KubeError(kube::Error::Api(resp)) => match resp.code {
                404 => ErrorKind::NotFound,
                409 => ErrorKind::Conflict,
                _ => ErrorKind::Transient,
            },
            OperatorError::KubeError(_) => ErrorKind::Transient,
            OperatorError::NotFound { .. } => ErrorKind::NotFound,
            OperatorError::Conflict(_) => ErrorKind::Conflict,
            OperatorError::Unmanaged(_) => ErrorKind::Unmanaged,
            OperatorError::BindingMismatch(_) => ErrorKind::BindingMismatch,
            OperatorError::AuthorizationDenied { .. } => ErrorKind::AuthorizationDenied,
            OperatorError::Transient(_) | OperatorError::BackoffExhausted { .. } => {
                ErrorKind::Transient
            }
            OperatorError::Configuration(_) => ErrorKind::Configuration,
            OperatorError::Invalid(_) => ErrorKind::Invalid,
            OperatorError::FinalizerError(inner) => match inner.as_ref() {
                kube::runtime::finalizer::Error::ApplyFailed(e)
                | kube::runtime::finalizer::Error::CleanupFailed(e) => e.kind(),
                _ => ErrorKind::Transient,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Whether a later redelivery of the same key may succeed without any
    /// change to the resource or the outside world.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;
