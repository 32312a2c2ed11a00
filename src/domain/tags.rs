//! Cache invalidation tags.
//!
//! Tags are grouped by namespace. A namespace either carries a set of values
//! (`node: {1, 2}`) or stands alone as a flag (`rendered`).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Namespaced invalidation tokens attached to a render tree or cache entry.
///
/// Merging is a set union, so the order in which tags are contributed never
/// changes the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheTags(BTreeMap<String, BTreeSet<String>>);

impl CacheTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`CacheTags::insert`].
    pub fn with(mut self, namespace: impl Into<String>, value: impl ToString) -> Self {
        self.insert(namespace, value);
        self
    }

    /// Builder form of [`CacheTags::insert_flag`].
    pub fn flag(mut self, namespace: impl Into<String>) -> Self {
        self.insert_flag(namespace);
        self
    }

    pub fn insert(&mut self, namespace: impl Into<String>, value: impl ToString) {
        self.0
            .entry(namespace.into())
            .or_default()
            .insert(value.to_string());
    }

    /// Add a namespace without values.
    pub fn insert_flag(&mut self, namespace: impl Into<String>) {
        self.0.entry(namespace.into()).or_default();
    }

    pub fn merge(&mut self, other: &CacheTags) {
        for (namespace, values) in &other.0 {
            self.0
                .entry(namespace.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    pub fn contains(&self, namespace: &str, value: &str) -> bool {
        self.0
            .get(namespace)
            .is_some_and(|values| values.contains(value))
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.0.contains_key(namespace)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.values().map(|values| values.len().max(1)).sum()
    }

    /// Flattened `namespace:value` tokens; flags flatten to the bare namespace.
    pub fn flatten(&self) -> Vec<String> {
        let mut flat = Vec::with_capacity(self.len());
        for (namespace, values) in &self.0 {
            if values.is_empty() {
                flat.push(namespace.clone());
                continue;
            }
            for value in values {
                flat.push(format!("{namespace}:{value}"));
            }
        }
        flat
    }

    /// Space separated list suitable for the cache-tags response header.
    pub fn to_header_value(&self) -> String {
        self.flatten().join(" ")
    }

    /// Inverse of [`CacheTags::flatten`]: `namespace:value` or a bare
    /// `namespace` flag per token.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tags = Self::new();
        for token in tokens {
            match token.as_ref().split_once(':') {
                Some((namespace, value)) => tags.insert(namespace, value),
                None => tags.insert_flag(token.as_ref()),
            }
        }
        tags
    }
}
