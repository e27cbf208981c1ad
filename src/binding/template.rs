// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Field-extraction template for authorization requests.
//!
//! A template maps output keys to dotted paths into a workload controller,
//! e.g. `app: metadata.labels.app` or `image: spec.template.spec.containers[0].image`.
//! Paths are parsed into [`WorkloadField`] up front, so a malformed template
//! is rejected before any workload is inspected. The first letter of each
//! path segment is case-insensitive.

use crate::error::{OperatorError, Result};
use crate::kubernetes::WorkloadController;
use std::collections::BTreeMap;

/// A supported location inside a workload controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkloadField {
    Kind,
    Name,
    Namespace,
    Label(String),
    Annotation(String),
    ServiceAccountName,
    Replicas,
    ContainerName(usize),
    ContainerImage(usize),
}

impl WorkloadField {
    pub fn parse(path: &str) -> Result<Self> {
        let raw: Vec<&str> = path.trim().split('.').collect();
        let normalized: Vec<String> = raw.iter().map(|s| lower_first(s)).collect();
        let segments: Vec<&str> = normalized.iter().map(String::as_str).collect();

        let field = match segments.as_slice() {
            ["kind"] => WorkloadField::Kind,
            ["metadata", "name"] => WorkloadField::Name,
            ["metadata", "namespace"] => WorkloadField::Namespace,
            ["metadata", "labels", _, ..] => WorkloadField::Label(raw[2..].join(".")),
            ["metadata", "annotations", _, ..] => WorkloadField::Annotation(raw[2..].join(".")),
            ["spec", "replicas"] => WorkloadField::Replicas,
            ["spec", "template", "spec", "serviceAccountName"] => WorkloadField::ServiceAccountName,
            ["spec", "template", "spec", containers, "name"] => {
                WorkloadField::ContainerName(container_index(containers, path)?)
            }
            ["spec", "template", "spec", containers, "image"] => {
                WorkloadField::ContainerImage(container_index(containers, path)?)
            }
            _ => return Err(unsupported(path)),
        };
        Ok(field)
    }

    /// Value of this field on a controller
    pub fn resolve(&self, controller: &WorkloadController) -> Result<String> {
        let missing = |what: String| {
            OperatorError::Configuration(format!(
                "{} not set on {} {}/{}",
                what,
                controller.kind(),
                controller.namespace(),
                controller.name()
            ))
        };

        match self {
            WorkloadField::Kind => Ok(controller.kind().to_string()),
            WorkloadField::Name => Ok(controller.name().to_string()),
            WorkloadField::Namespace => Ok(controller.namespace().to_string()),
            WorkloadField::Label(key) => controller
                .label(key)
                .map(str::to_string)
                .ok_or_else(|| missing(format!("label {}", key))),
            WorkloadField::Annotation(key) => controller
                .annotation(key)
                .map(str::to_string)
                .ok_or_else(|| missing(format!("annotation {}", key))),
            WorkloadField::ServiceAccountName => Ok(controller.service_account_name().to_string()),
            WorkloadField::Replicas => controller
                .replicas()
                .map(|r| r.to_string())
                .ok_or_else(|| missing("spec.replicas".to_string())),
            WorkloadField::ContainerName(index) => Ok(container(controller, *index)
                .ok_or_else(|| missing(format!("container {}", index)))?
                .name
                .clone()),
            WorkloadField::ContainerImage(index) => container(controller, *index)
                .ok_or_else(|| missing(format!("container {}", index)))?
                .image
                .clone()
                .ok_or_else(|| missing(format!("image of container {}", index))),
        }
    }
}

fn container(
    controller: &WorkloadController,
    index: usize,
) -> Option<&k8s_openapi::api::core::v1::Container> {
    controller
        .pod_spec()
        .and_then(|spec| spec.containers.get(index))
}

fn lower_first(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn container_index(segment: &str, path: &str) -> Result<usize> {
    segment
        .strip_prefix("containers[")
        .and_then(|s| s.strip_suffix(']'))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| unsupported(path))
}

fn unsupported(path: &str) -> OperatorError {
    OperatorError::Configuration(format!("unsupported template field {:?}", path))
}

/// Parsed template: output key to workload field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BodyTemplate {
    fields: BTreeMap<String, WorkloadField>,
}

impl BodyTemplate {
    /// Parse every path of the template, failing on the first unsupported one
    pub fn parse(data: &BTreeMap<String, String>) -> Result<Self> {
        let fields = data
            .iter()
            .map(|(key, path)| WorkloadField::parse(path).map(|field| (key.clone(), field)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { fields })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolve every field against a controller into a request body
    pub fn render(&self, controller: &WorkloadController) -> Result<BTreeMap<String, String>> {
        self.fields
            .iter()
            .map(|(key, field)| field.resolve(controller).map(|value| (key.clone(), value)))
            .collect()
    }
}
