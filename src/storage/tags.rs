// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Ownership marker and tag namespace handling, and tag set convergence.

use super::Tag;
use crate::constants::tags::{OWNERSHIP_KEY, OWNERSHIP_VALUE};
use std::collections::BTreeMap;
use tracing::debug;

/// Encodes the operator's tag namespace and ownership marker on a tag set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCodec {
    prefix: String,
}

/// Outcome of converging a live tag set towards the desired tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagDiff {
    pub changed: bool,
    pub tags: Vec<Tag>,
}

impl TagCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn ownership_marker() -> Tag {
        Tag::new(OWNERSHIP_KEY, OWNERSHIP_VALUE)
    }

    pub fn is_ownership_marker(tag: &Tag) -> bool {
        tag.key == OWNERSHIP_KEY && tag.value == OWNERSHIP_VALUE
    }

    /// Whether a tag set proves operator management
    pub fn is_owned(tags: &[Tag]) -> bool {
        tags.iter().any(Self::is_ownership_marker)
    }

    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// The user key of an operator-namespaced tag key, `None` for foreign keys
    pub fn strip_prefix<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())
    }

    /// Tag set for a freshly created bucket
    pub fn encode(&self, desired: &BTreeMap<String, String>) -> Vec<Tag> {
        self.diff(desired, &[]).tags
    }

    /// Converge `live` towards `desired`.
    ///
    /// Foreign tags are kept verbatim and in order. Operator tags are replaced
    /// by the namespaced desired tags, and the ownership marker is always
    /// present exactly once in the result.
    pub fn diff(&self, desired: &BTreeMap<String, String>, live: &[Tag]) -> TagDiff {
        let mut changed = false;
        let mut has_marker = false;
        let mut foreign = Vec::new();
        let mut live_namespaced = BTreeMap::new();

        for tag in live {
            if Self::is_ownership_marker(tag) {
                has_marker = true;
                continue;
            }
            match self.strip_prefix(&tag.key) {
                Some(user_key) => {
                    if desired.get(user_key) != Some(&tag.value) {
                        debug!("operator tag {} differs from desired state", tag);
                        changed = true;
                    }
                    live_namespaced.insert(tag.key.as_str(), tag.value.as_str());
                }
                None => foreign.push(tag.clone()),
            }
        }

        let mut tags = foreign;
        for (key, value) in desired {
            let key = self.namespaced_key(key);
            if live_namespaced.get(key.as_str()) != Some(&value.as_str()) {
                debug!("desired tag {}={} missing on bucket", key, value);
                changed = true;
            }
            tags.push(Tag::new(key, value.clone()));
        }

        if !has_marker {
            changed = true;
        }
        tags.push(Self::ownership_marker());

        TagDiff { changed, tags }
    }
}
