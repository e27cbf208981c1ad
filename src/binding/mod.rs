// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Service account binding and authorization of workloads.

pub mod authorization;
pub mod binder;
pub mod template;

pub use authorization::{ApprovalOutcome, ApprovalRequest, Approver, AuthorizationClient};
pub use binder::{ServiceIdentityBinding, WorkloadBinder, WorkloadMatch};
pub use template::{BodyTemplate, WorkloadField};
