//! Cache storage.
//!
//! [`CacheStore`] is the persistence seam of the render cache; [`MemoryStore`]
//! is the in-process implementation with per-bin LRU eviction and tag based
//! invalidation.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::RwLock;

use lru::LruCache;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::domain::render::{RecursionStorage, RenderNode};
use crate::domain::tags::CacheTags;
use crate::domain::types::Expire;
use crate::infra::error::InfraError;

use super::lock::{rw_read, rw_write};
use super::registry::{EntryKey, TagRegistry};

const SOURCE: &str = "cache::store";

/// What is persisted for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRender {
    /// The stripped tree: markup or structure plus attached assets.
    pub node: RenderNode,
    /// Cache metadata and post-render callbacks collected from the tree.
    pub metadata: RecursionStorage,
    /// Top-level properties kept alongside rendered markup.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub preserved: BTreeMap<String, Value>,
}

impl CachedRender {
    /// Rebuild the node handed back to callers: metadata on the top level
    /// and preserved properties restored without overriding existing ones.
    pub fn into_node(self) -> RenderNode {
        let mut node = self.node;
        node.absorb(self.metadata);
        for (key, value) in self.preserved {
            node.properties.entry(key).or_insert(value);
        }
        node
    }

    pub fn tags(&self) -> &CacheTags {
        &self.metadata.cache.tags
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub cid: String,
    pub data: CachedRender,
    pub expire: Expire,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

/// Persistence used by the render cache.
pub trait CacheStore: Send + Sync {
    /// Fetch every live entry among `cids`; misses are simply absent.
    fn get_multiple(
        &self,
        cids: &[String],
        bin: &str,
    ) -> Result<HashMap<String, CachedEntry>, InfraError>;

    fn set(&self, cid: &str, data: CachedRender, bin: &str, expire: Expire)
    -> Result<(), InfraError>;

    fn clear(&self, cid: &str, bin: &str) -> Result<(), InfraError>;

    /// Remove every entry depending on any of `tags`; returns how many.
    fn invalidate_tags(&self, tags: &CacheTags) -> Result<usize, InfraError>;
}

/// In-memory store with one LRU per bin.
pub struct MemoryStore {
    bins: RwLock<HashMap<String, LruCache<String, CachedEntry>>>,
    capacity: NonZeroUsize,
    registry: TagRegistry,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            bins: RwLock::new(HashMap::new()),
            capacity,
            registry: TagRegistry::new(),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.bins, SOURCE, "len")
            .values()
            .map(LruCache::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bin_len(&self, bin: &str) -> usize {
        rw_read(&self.bins, SOURCE, "bin_len")
            .get(bin)
            .map_or(0, LruCache::len)
    }

    pub fn clear_bin(&self, bin: &str) {
        if let Some(mut cache) = rw_write(&self.bins, SOURCE, "clear_bin").remove(bin) {
            while let Some((cid, _)) = cache.pop_lru() {
                self.registry.unregister(&EntryKey::new(bin, cid));
            }
        }
    }

    pub fn clear_all(&self) {
        rw_write(&self.bins, SOURCE, "clear_all").clear();
        self.registry.clear();
    }

    /// Drop every temporary entry, as a general cache wipe would.
    pub fn clear_temporary(&self) -> usize {
        let mut bins = rw_write(&self.bins, SOURCE, "clear_temporary");
        let mut removed = 0;
        for (bin, cache) in bins.iter_mut() {
            let temporary: Vec<String> = cache
                .iter()
                .filter(|(_, entry)| entry.expire == Expire::Temporary)
                .map(|(cid, _)| cid.clone())
                .collect();
            for cid in temporary {
                cache.pop(&cid);
                self.registry.unregister(&EntryKey::new(bin.as_str(), cid));
                removed += 1;
            }
        }
        removed
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }
}

impl CacheStore for MemoryStore {
    fn get_multiple(
        &self,
        cids: &[String],
        bin: &str,
    ) -> Result<HashMap<String, CachedEntry>, InfraError> {
        let now = OffsetDateTime::now_utc();
        let mut bins = rw_write(&self.bins, SOURCE, "get_multiple");
        let Some(cache) = bins.get_mut(bin) else {
            return Ok(HashMap::new());
        };

        let mut found = HashMap::with_capacity(cids.len());
        for cid in cids {
            let expired = match cache.get(cid) {
                Some(entry) if entry.expire.is_expired(now) => true,
                Some(entry) => {
                    found.insert(cid.clone(), entry.clone());
                    false
                }
                None => false,
            };
            if expired {
                cache.pop(cid);
                self.registry.unregister(&EntryKey::new(bin, cid.as_str()));
                trace!(bin, cid = %cid, "Dropped expired entry");
            }
        }
        Ok(found)
    }

    fn set(
        &self,
        cid: &str,
        data: CachedRender,
        bin: &str,
        expire: Expire,
    ) -> Result<(), InfraError> {
        let tags = data.tags().clone();
        let entry = CachedEntry {
            cid: cid.to_string(),
            data,
            expire,
            created: OffsetDateTime::now_utc(),
        };

        let evicted = {
            let mut bins = rw_write(&self.bins, SOURCE, "set");
            bins.entry(bin.to_string())
                .or_insert_with(|| LruCache::new(self.capacity))
                .push(cid.to_string(), entry)
        };

        if let Some((evicted_cid, _)) = evicted
            && evicted_cid != cid
        {
            self.registry.unregister(&EntryKey::new(bin, evicted_cid));
            counter!("render_cache_evict_total", "bin" => bin.to_string()).increment(1);
        }
        self.registry.register(EntryKey::new(bin, cid), &tags);
        Ok(())
    }

    fn clear(&self, cid: &str, bin: &str) -> Result<(), InfraError> {
        if let Some(cache) = rw_write(&self.bins, SOURCE, "clear").get_mut(bin) {
            cache.pop(cid);
        }
        self.registry.unregister(&EntryKey::new(bin, cid));
        Ok(())
    }

    fn invalidate_tags(&self, tags: &CacheTags) -> Result<usize, InfraError> {
        let entries = self.registry.entries_for_tags(tags);
        if entries.is_empty() {
            return Ok(0);
        }

        {
            let mut bins = rw_write(&self.bins, SOURCE, "invalidate_tags");
            for entry in &entries {
                if let Some(cache) = bins.get_mut(&entry.bin) {
                    cache.pop(&entry.cid);
                }
            }
        }
        for entry in &entries {
            self.registry.unregister(entry);
        }

        debug!(
            tags = %tags.to_header_value(),
            removed = entries.len(),
            "Invalidated render cache entries by tag"
        );
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::domain::render::CacheMetadata;

    fn render(markup: &str, tags: CacheTags) -> CachedRender {
        CachedRender {
            node: RenderNode::markup(markup),
            metadata: RecursionStorage {
                cache: CacheMetadata {
                    tags,
                    ..CacheMetadata::default()
                },
                ..RecursionStorage::default()
            },
            preserved: BTreeMap::new(),
        }
    }

    fn store(capacity: usize) -> MemoryStore {
        MemoryStore::new(NonZeroUsize::new(capacity).expect("non-zero"))
    }

    #[test]
    fn set_then_get_multiple() {
        let store = store(10);
        store
            .set("a", render("A", CacheTags::new()), "cache_render", Expire::Permanent)
            .expect("set");

        let found = store
            .get_multiple(&["a".to_string(), "b".to_string()], "cache_render")
            .expect("get");
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"].data.node.markup.as_deref(), Some("A"));

        let other_bin = store
            .get_multiple(&["a".to_string()], "cache_block")
            .expect("get");
        assert!(other_bin.is_empty());
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let store = store(10);
        let past = OffsetDateTime::now_utc() - Duration::minutes(1);
        store
            .set("a", render("A", CacheTags::new()), "cache_render", Expire::At(past))
            .expect("set");

        let found = store.get_multiple(&["a".to_string()], "cache_render").expect("get");
        assert!(found.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn invalidate_tags_removes_dependents_only() {
        let store = store(10);
        store
            .set("a", render("A", CacheTags::new().with("node", 1)), "cache_render", Expire::Permanent)
            .expect("set");
        store
            .set("b", render("B", CacheTags::new().with("node", 2)), "cache_render", Expire::Permanent)
            .expect("set");

        let removed = store
            .invalidate_tags(&CacheTags::new().with("node", 1))
            .expect("invalidate");
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.registry().entry_count(), 1);
    }

    #[test]
    fn eviction_unregisters_tags() {
        let store = store(1);
        store
            .set("a", render("A", CacheTags::new().with("node", 1)), "cache_render", Expire::Permanent)
            .expect("set");
        store
            .set("b", render("B", CacheTags::new().with("node", 2)), "cache_render", Expire::Permanent)
            .expect("set");

        assert_eq!(store.bin_len("cache_render"), 1);
        assert_eq!(store.registry().entry_count(), 1);
        assert!(
            store
                .registry()
                .entries_for_tags(&CacheTags::new().with("node", 1))
                .is_empty()
        );
    }

    #[test]
    fn clear_temporary_keeps_permanent_entries() {
        let store = store(10);
        store
            .set("a", render("A", CacheTags::new()), "cache_render", Expire::Temporary)
            .expect("set");
        store
            .set("b", render("B", CacheTags::new()), "cache_render", Expire::Permanent)
            .expect("set");

        assert_eq!(store.clear_temporary(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn into_node_restores_metadata_and_preserved_properties() {
        let mut data = render("A", CacheTags::new().with("node", 1));
        data.preserved
            .insert("title".to_string(), Value::from("Hello"));
        let node = data.into_node();
        assert!(node.cache.tags.contains("node", "1"));
        assert_eq!(node.properties["title"], Value::from("Hello"));
    }
}
