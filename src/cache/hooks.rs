//! Alter listeners for cache info resolution.
//!
//! Listeners register per controller kind and run in ascending priority;
//! equal priorities keep registration order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::domain::context::Context;
use crate::domain::tags::CacheTags;

use super::info::{CacheHash, CacheInfo};

/// Resolution events a listener can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlterEvent {
    DefaultCacheInfo,
    CacheInfo,
    Keys,
    Hash,
    Tags,
    Validate,
    Cid,
}

impl AlterEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AlterEvent::DefaultCacheInfo => "default_cache_info",
            AlterEvent::CacheInfo => "cache_info",
            AlterEvent::Keys => "keys",
            AlterEvent::Hash => "hash",
            AlterEvent::Tags => "tags",
            AlterEvent::Validate => "validate",
            AlterEvent::Cid => "cid",
        }
    }

    pub const ALL: [AlterEvent; 7] = [
        AlterEvent::DefaultCacheInfo,
        AlterEvent::CacheInfo,
        AlterEvent::Keys,
        AlterEvent::Hash,
        AlterEvent::Tags,
        AlterEvent::Validate,
        AlterEvent::Cid,
    ];
}

/// Extension point for adjusting how objects are cached.
///
/// Every method defaults to a no-op; implement only the events of interest.
pub trait CacheInfoAlter: Send + Sync {
    fn alter_default_cache_info(&self, _info: &mut CacheInfo, _context: &Context) {}

    fn alter_cache_info(&self, _info: &mut CacheInfo, _context: &Context) {}

    fn alter_keys(&self, _keys: &mut Vec<String>, _info: &CacheInfo, _context: &Context) {}

    fn alter_hash(&self, _hash: &mut CacheHash, _info: &CacheInfo, _context: &Context) {}

    fn alter_tags(&self, _tags: &mut CacheTags, _info: &CacheInfo, _context: &Context) {}

    fn alter_validate(
        &self,
        _validate: &mut BTreeMap<String, Value>,
        _info: &CacheInfo,
        _context: &Context,
    ) {
    }

    /// Adjust the ordered parts before they are joined into the cache id.
    fn alter_cid(&self, _parts: &mut Vec<String>, _info: &CacheInfo, _context: &Context) {}

    /// Events this listener handles; used for debug output only.
    fn events(&self) -> &[AlterEvent] {
        &AlterEvent::ALL
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

struct Registered {
    priority: i32,
    listener: Arc<dyn CacheInfoAlter>,
}

/// Registry of alter listeners keyed by controller kind.
#[derive(Default)]
pub struct AlterRegistry {
    listeners: HashMap<String, Vec<Registered>>,
}

impl AlterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, listener: Arc<dyn CacheInfoAlter>) {
        self.register_with_priority(kind, 0, listener);
    }

    pub fn register_with_priority(
        &mut self,
        kind: impl Into<String>,
        priority: i32,
        listener: Arc<dyn CacheInfoAlter>,
    ) {
        let list = self.listeners.entry(kind.into()).or_default();
        // Stable position: after every listener with priority <= ours.
        let index = list
            .iter()
            .position(|existing| existing.priority > priority)
            .unwrap_or(list.len());
        list.insert(index, Registered { priority, listener });
    }

    fn listeners(&self, kind: &str) -> impl Iterator<Item = &Arc<dyn CacheInfoAlter>> {
        self.listeners
            .get(kind)
            .into_iter()
            .flatten()
            .map(|registered| &registered.listener)
    }

    pub fn listener_count(&self, kind: &str) -> usize {
        self.listeners.get(kind).map_or(0, Vec::len)
    }

    /// `kind.event` labels of every registered listener, for debug output.
    pub fn describe(&self, kind: &str) -> Vec<String> {
        self.listeners(kind)
            .flat_map(|listener| {
                listener
                    .events()
                    .iter()
                    .map(move |event| format!("{}: {kind}.{}", listener.name(), event.as_str()))
            })
            .collect()
    }

    pub fn alter_default_cache_info(&self, kind: &str, info: &mut CacheInfo, context: &Context) {
        for listener in self.listeners(kind) {
            listener.alter_default_cache_info(info, context);
        }
        trace!(kind, event = "default_cache_info", "Applied cache info alters");
    }

    pub fn alter_cache_info(&self, kind: &str, info: &mut CacheInfo, context: &Context) {
        for listener in self.listeners(kind) {
            listener.alter_cache_info(info, context);
        }
    }

    pub fn alter_keys(&self, kind: &str, info: &mut CacheInfo, context: &Context) {
        let mut keys = std::mem::take(&mut info.keys);
        for listener in self.listeners(kind) {
            listener.alter_keys(&mut keys, info, context);
        }
        info.keys = keys;
    }

    pub fn alter_hash(&self, kind: &str, info: &mut CacheInfo, context: &Context) {
        let mut hash = std::mem::take(&mut info.hash);
        for listener in self.listeners(kind) {
            listener.alter_hash(&mut hash, info, context);
        }
        info.hash = hash;
    }

    pub fn alter_tags(&self, kind: &str, info: &mut CacheInfo, context: &Context) {
        let mut tags = std::mem::take(&mut info.tags);
        for listener in self.listeners(kind) {
            listener.alter_tags(&mut tags, info, context);
        }
        info.tags = tags;
    }

    pub fn alter_validate(&self, kind: &str, info: &mut CacheInfo, context: &Context) {
        let mut validate = std::mem::take(&mut info.validate);
        for listener in self.listeners(kind) {
            listener.alter_validate(&mut validate, info, context);
        }
        info.validate = validate;
    }

    pub fn alter_cid(
        &self,
        kind: &str,
        parts: &mut Vec<String>,
        info: &CacheInfo,
        context: &Context,
    ) {
        for listener in self.listeners(kind) {
            listener.alter_cid(parts, info, context);
        }
    }
}
