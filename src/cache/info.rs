//! Per-object cache descriptor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::tags::CacheTags;
use crate::domain::types::{CacheStrategy, Expire, Granularity};

/// Ordered hash contributions; values feed the digest in insertion order.
///
/// Re-inserting a key replaces its value in place, so a later contributor can
/// override a field without moving it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheHash(Vec<(String, String)>);

impl CacheHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.0.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((key, value)),
        }
    }

    /// Booleans hash as `"1"` and `""`.
    pub fn insert_bool(&mut self, key: impl Into<String>, value: bool) {
        self.insert(key, if value { "1" } else { "" });
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.0.iter().position(|(existing, _)| existing == key)?;
        Some(self.0.remove(index).1)
    }

    pub fn extend(&mut self, other: CacheHash) {
        for (key, value) in other.0 {
            self.insert(key, value);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, value)| value.as_str())
    }

    /// Digest input: values joined with `-`.
    pub fn digest_input(&self) -> String {
        self.values().collect::<Vec<_>>().join("-")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Options applied when an object is rendered to markup before storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupOptions {
    /// Delegate rendering and storage to the host evaluator.
    #[serde(default)]
    pub cache_late: bool,
    /// Top-level node properties kept alongside the rendered markup.
    #[serde(default)]
    pub preserve_properties: Vec<String>,
}

/// Whether and how an object is rendered to markup before storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderToMarkup {
    #[default]
    Disabled,
    Enabled,
    Options(MarkupOptions),
}

impl RenderToMarkup {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, RenderToMarkup::Disabled)
    }

    pub fn cache_late(&self) -> bool {
        matches!(self, RenderToMarkup::Options(options) if options.cache_late)
    }

    pub fn preserve_properties(&self) -> &[String] {
        match self {
            RenderToMarkup::Options(options) => &options.preserve_properties,
            _ => &[],
        }
    }

    /// The strategy an object with these options is stored under.
    pub fn strategy(&self) -> CacheStrategy {
        match self {
            RenderToMarkup::Disabled => CacheStrategy::NoRender,
            _ if self.cache_late() => CacheStrategy::LateRender,
            _ => CacheStrategy::DirectRender,
        }
    }
}

/// Cache configuration of one object, built by the resolver from controller
/// defaults, object contributions and alter listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub bin: String,
    pub expire: Expire,
    /// Unset granularity makes the whole controller uncacheable.
    pub granularity: Option<Granularity>,
    pub keys: Vec<String>,
    pub tags: CacheTags,
    pub hash: CacheHash,
    /// Opaque data handed to the validation strategy.
    pub validate: BTreeMap<String, Value>,
    /// Placeholder render strategies, tried in order. Non-empty means the
    /// object is deferred behind a placeholder.
    pub render_strategy: Vec<String>,
    pub render_to_markup: RenderToMarkup,
    /// Allow caching on non GET/HEAD requests.
    pub ignore_request_method_check: bool,
    /// Set by the resolver; read through [`CacheInfo::strategy`].
    pub cache_strategy: Option<CacheStrategy>,
    pub preserve_properties: Vec<String>,
    pub debug_output: bool,
    pub cid: Option<String>,
    pub placeholder_id: Option<String>,
}

impl CacheInfo {
    /// Descriptor with the given bin and nothing else set.
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            expire: Expire::Permanent,
            granularity: None,
            keys: Vec::new(),
            tags: CacheTags::new(),
            hash: CacheHash::new(),
            validate: BTreeMap::new(),
            render_strategy: Vec::new(),
            render_to_markup: RenderToMarkup::Disabled,
            ignore_request_method_check: false,
            cache_strategy: None,
            preserve_properties: Vec::new(),
            debug_output: false,
            cid: None,
            placeholder_id: None,
        }
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.cache_strategy
            .unwrap_or_else(|| self.render_to_markup.strategy())
    }

    /// Fix the storage strategy and preserved properties from the markup
    /// options, keeping anything set explicitly.
    pub fn finalize(&mut self) {
        if self.cache_strategy.is_none() {
            self.cache_strategy = Some(self.render_to_markup.strategy());
        }
        for property in self.render_to_markup.preserve_properties() {
            if !self.preserve_properties.contains(property) {
                self.preserve_properties.push(property.clone());
            }
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder_id.is_some()
    }
}
