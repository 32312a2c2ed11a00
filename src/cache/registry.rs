//! Bidirectional tag registry.
//!
//! Tracks which stored entries depend on which cache tags so that
//! invalidating a tag can clear every dependent entry.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::domain::tags::CacheTags;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// Location of a stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub bin: String,
    pub cid: String,
}

impl EntryKey {
    pub fn new(bin: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            cid: cid.into(),
        }
    }
}

/// Tracks flattened tag → entries and entry → tags mappings.
pub struct TagRegistry {
    tag_to_entries: RwLock<HashMap<String, HashSet<EntryKey>>>,
    entry_to_tags: RwLock<HashMap<EntryKey, HashSet<String>>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self {
            tag_to_entries: RwLock::new(HashMap::new()),
            entry_to_tags: RwLock::new(HashMap::new()),
        }
    }

    /// Register an entry with the tags it depends on, replacing any previous
    /// registration of the same entry.
    pub fn register(&self, entry: EntryKey, tags: &CacheTags) {
        self.unregister(&entry);

        let flat: HashSet<String> = tags.flatten().into_iter().collect();
        let mut t2e = rw_write(&self.tag_to_entries, SOURCE, "register.tag_to_entries");
        let mut e2t = rw_write(&self.entry_to_tags, SOURCE, "register.entry_to_tags");

        for tag in &flat {
            t2e.entry(tag.clone()).or_default().insert(entry.clone());
        }
        e2t.insert(entry, flat);
    }

    /// Entries depending on any of the given tags.
    ///
    /// A tag namespace without values (e.g. `node_view`) matches entries that
    /// registered the bare flag.
    pub fn entries_for_tags(&self, tags: &CacheTags) -> HashSet<EntryKey> {
        let t2e = rw_read(&self.tag_to_entries, SOURCE, "entries_for_tags");
        tags.flatten()
            .iter()
            .filter_map(|tag| t2e.get(tag))
            .flat_map(|entries| entries.iter().cloned())
            .collect()
    }

    pub fn tags_for_entry(&self, entry: &EntryKey) -> HashSet<String> {
        rw_read(&self.entry_to_tags, SOURCE, "tags_for_entry")
            .get(entry)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget an entry, e.g. after eviction or invalidation.
    pub fn unregister(&self, entry: &EntryKey) {
        let mut t2e = rw_write(&self.tag_to_entries, SOURCE, "unregister.tag_to_entries");
        let mut e2t = rw_write(&self.entry_to_tags, SOURCE, "unregister.entry_to_tags");

        if let Some(tags) = e2t.remove(entry) {
            for tag in tags {
                if let Some(entries) = t2e.get_mut(&tag) {
                    entries.remove(entry);
                    if entries.is_empty() {
                        t2e.remove(&tag);
                    }
                }
            }
        }
    }

    pub fn clear(&self) {
        rw_write(&self.tag_to_entries, SOURCE, "clear.tag_to_entries").clear();
        rw_write(&self.entry_to_tags, SOURCE, "clear.entry_to_tags").clear();
    }

    pub fn tag_count(&self) -> usize {
        rw_read(&self.tag_to_entries, SOURCE, "tag_count").len()
    }

    pub fn entry_count(&self) -> usize {
        rw_read(&self.entry_to_tags, SOURCE, "entry_count").len()
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}
