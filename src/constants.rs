// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Kubernetes annotation keys written by the operator
pub mod annotations {
    /// IAM role bound to a service account (IRSA)
    pub const ROLE_ARN: &str = "eks.amazonaws.com/role-arn";
}

/// Bucket and role tagging
pub mod tags {
    /// Key of the tag marking a bucket or role as operator managed
    pub const OWNERSHIP_KEY: &str = "createdBy";
    /// Value of the ownership marker tag
    pub const OWNERSHIP_VALUE: &str = "s3Operator";
    /// Default namespace prefix for tags sourced from the resource spec
    pub const DEFAULT_PREFIX: &str = "s3operator/";
}

/// Identity role naming and policy ARNs
pub mod iam {
    /// Appended to the bucket name to form the role name
    pub const ROLE_NAME_SUFFIX: &str = "-s3operator-role";
    pub const S3_ARN_PREFIX: &str = "arn:aws:s3:::";
    pub const POLICY_VERSION: &str = "2012-10-17";
}

/// The operator name used for field managers and finalizers
pub const OPERATOR_NAME: &str = "s3-operator";

/// Finalizer guarding bucket cleanup on resource deletion
pub const FINALIZER: &str = "s3operator.io/cleanup";

/// API group of the S3Bucket custom resource
pub const API_GROUP: &str = "s3operator.io";

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
