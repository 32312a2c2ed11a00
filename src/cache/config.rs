//! Runtime render cache configuration.
//!
//! Built from the `[render_cache]` and `[store]` sections of the settings file.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;

use serde::Deserialize;

use super::keys::HashAlgorithm;

const DEFAULT_BIN: &str = "cache_render";
const DEFAULT_STORE_CAPACITY: usize = 1000;

/// Render cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderCacheConfig {
    /// Global switch; when off nothing is read from or written to the store.
    pub enabled: bool,
    /// Controller kinds (`entity`, `block`, `page`) with caching turned off.
    pub disabled_kinds: BTreeSet<String>,
    /// Per-kind scopes with caching turned off, written `kind:scope`
    /// (e.g. `entity:comment` or `block:sidebar_first`).
    pub disabled_scopes: BTreeSet<String>,
    /// Page callbacks that opt into full page caching.
    pub enabled_pages: BTreeSet<String>,
    /// Emit the aggregated cache tags as a response header.
    pub send_cache_tags: bool,
    pub hash_algorithm: HashAlgorithm,
    /// Wrap every rendered object in an HTML comment with its cache info.
    pub debug_output: bool,
    /// Limit debug output to these kinds; empty means every kind.
    pub debug_output_kinds: BTreeSet<String>,
    pub default_bin: String,
    /// Maximum entries per bin in the in-memory store.
    pub store_capacity: usize,
}

impl Default for RenderCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled_kinds: BTreeSet::new(),
            disabled_scopes: BTreeSet::new(),
            enabled_pages: BTreeSet::new(),
            send_cache_tags: true,
            hash_algorithm: HashAlgorithm::default(),
            debug_output: false,
            debug_output_kinds: BTreeSet::new(),
            default_bin: DEFAULT_BIN.to_string(),
            store_capacity: DEFAULT_STORE_CAPACITY,
        }
    }
}

impl From<&crate::config::Settings> for RenderCacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        let render = &settings.render_cache;
        Self {
            enabled: render.enabled,
            disabled_kinds: render.disabled_kinds.iter().cloned().collect(),
            disabled_scopes: render.disabled_scopes.iter().cloned().collect(),
            enabled_pages: render.enabled_pages.iter().cloned().collect(),
            send_cache_tags: render.send_cache_tags,
            hash_algorithm: render.hash_algorithm,
            debug_output: render.debug_output,
            debug_output_kinds: render.debug_output_kinds.iter().cloned().collect(),
            default_bin: render.default_bin.clone(),
            store_capacity: settings.store.capacity_per_bin.get(),
        }
    }
}

impl RenderCacheConfig {
    pub fn kind_enabled(&self, kind: &str) -> bool {
        self.enabled && !self.disabled_kinds.contains(kind)
    }

    /// Whether a scope of a kind (entity type, block region) may be cached.
    pub fn scope_enabled(&self, kind: &str, scope: &str) -> bool {
        self.kind_enabled(kind) && !self.disabled_scopes.contains(&format!("{kind}:{scope}"))
    }

    /// Full page caching is opt-in per page callback.
    pub fn page_enabled(&self, callback: &str) -> bool {
        self.enabled_pages.contains(callback)
    }

    pub fn debug_output_for(&self, kind: &str) -> bool {
        self.debug_output
            && (self.debug_output_kinds.is_empty() || self.debug_output_kinds.contains(kind))
    }

    /// Returns the store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn store_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.store_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
