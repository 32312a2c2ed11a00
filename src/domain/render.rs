//! Render tree consumed and produced by the render cache.
//!
//! A [`RenderNode`] is the host's markup description: optional markup text,
//! weighted children, attached assets and cache metadata. The render cache only
//! reads and writes the well-known metadata fields and otherwise treats the
//! tree opaquely.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::assets::Attached;
use super::tags::CacheTags;

/// Cache metadata that bubbles up from nested render nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    #[serde(default, skip_serializing_if = "CacheTags::is_empty")]
    pub tags: CacheTags,
    /// Every max-age contributed so far; the effective value is the minimum.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub max_age: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub downstream_ttl: Vec<u64>,
}

impl CacheMetadata {
    pub fn merge(&mut self, other: &CacheMetadata) {
        self.tags.merge(&other.tags);
        self.max_age.extend_from_slice(&other.max_age);
        self.downstream_ttl.extend_from_slice(&other.downstream_ttl);
    }

    /// A node cannot be cached longer than its most volatile descendant.
    pub fn effective_max_age(&self) -> Option<u64> {
        self.max_age.iter().copied().min()
    }

    pub fn effective_downstream_ttl(&self) -> Option<u64> {
        self.downstream_ttl.iter().copied().min()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.max_age.is_empty() && self.downstream_ttl.is_empty()
    }
}

/// Ordered, named arguments captured for a deferred callback.
pub type PlaceholderArgs = Vec<(String, Value)>;

/// Context captured at render time for a deferred post-render callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderContext {
    /// Name of the registered placeholder function producing the content.
    pub function: String,
    #[serde(default)]
    pub args: PlaceholderArgs,
    /// Token embedded in the parent markup.
    pub token: String,
}

/// One registered post-render callback and the contexts it runs with.
///
/// Entries with a `group` are batch entries: the callback runs once with every
/// context of the group instead of once per context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRenderEntry {
    pub callback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub contexts: Vec<PlaceholderContext>,
}

/// Deferred post-render callbacks, keyed by callback (and group).
///
/// Merging concatenates contexts per key, keeping call order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostRenderCache {
    entries: Vec<PostRenderEntry>,
}

impl PostRenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        callback: impl Into<String>,
        group: Option<String>,
        context: PlaceholderContext,
    ) {
        self.push_all(callback.into(), group, vec![context]);
    }

    fn push_all(&mut self, callback: String, group: Option<String>, contexts: Vec<PlaceholderContext>) {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.callback == callback && entry.group == group)
        {
            Some(entry) => entry.contexts.extend(contexts),
            None => self.entries.push(PostRenderEntry {
                callback,
                group,
                contexts,
            }),
        }
    }

    pub fn merge(&mut self, other: PostRenderCache) {
        for entry in other.entries {
            self.push_all(entry.callback, entry.group, entry.contexts);
        }
    }

    pub fn entries(&self) -> &[PostRenderEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<PostRenderEntry> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of registered contexts across all callbacks.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|entry| entry.contexts.len()).sum()
    }
}

/// Metadata collected from completed nested renders.
///
/// Produced when a node is stripped of its metadata and when a recursion frame
/// is collapsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecursionStorage {
    #[serde(default, skip_serializing_if = "CacheMetadata::is_empty")]
    pub cache: CacheMetadata,
    #[serde(default, skip_serializing_if = "Attached::is_empty")]
    pub attached: Attached,
    #[serde(default, skip_serializing_if = "PostRenderCache::is_empty")]
    pub post_render_cache: PostRenderCache,
}

impl RecursionStorage {
    pub fn merge(&mut self, other: RecursionStorage) {
        self.cache.merge(&other.cache);
        self.attached.merge(&other.attached);
        self.post_render_cache.merge(other.post_render_cache);
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty() && self.attached.is_empty() && self.post_render_cache.is_empty()
    }
}

/// Marker left on a node whose storage is delegated to the host evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStamp {
    pub cid: String,
    pub keys: Vec<String>,
    pub bin: String,
    /// Tags the entry is registered under. The node's own metadata may have
    /// moved into an enclosing frame by the time it is printed.
    #[serde(default, skip_serializing_if = "CacheTags::is_empty")]
    pub tags: CacheTags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markup: Option<String>,
    #[serde(default)]
    pub weight: i32,
    #[serde(default, skip_serializing_if = "CacheMetadata::is_empty")]
    pub cache: CacheMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stamp: Option<CacheStamp>,
    #[serde(default, skip_serializing_if = "Attached::is_empty")]
    pub attached: Attached,
    #[serde(default, skip_serializing_if = "PostRenderCache::is_empty")]
    pub post_render_cache: PostRenderCache,
    /// Host-defined properties the cache does not interpret.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<(String, RenderNode)>,
    /// Storage captured while this node was rendered, carried to the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursion_storage: Option<Box<RecursionStorage>>,
    /// Set by the markup renderer once the node has been turned into markup.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub printed: bool,
}

impl RenderNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn markup(markup: impl Into<String>) -> Self {
        Self {
            markup: Some(markup.into()),
            ..Self::default()
        }
    }

    pub fn with_child(mut self, key: impl Into<String>, child: RenderNode) -> Self {
        self.children.push((key.into(), child));
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_tags(mut self, tags: CacheTags) -> Self {
        self.cache.tags.merge(&tags);
        self
    }

    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.cache.max_age.push(seconds);
        self
    }

    pub fn with_asset(mut self, kind: impl Into<String>, item: impl Into<String>) -> Self {
        self.attached.add(kind, item);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn child(&self, key: &str) -> Option<&RenderNode> {
        self.children
            .iter()
            .find(|(child_key, _)| child_key == key)
            .map(|(_, child)| child)
    }

    pub fn is_empty(&self) -> bool {
        self.markup.is_none()
            && self.children.is_empty()
            && self.properties.is_empty()
            && self.attached.is_empty()
    }

    /// Child indices ordered by weight; equal weights keep insertion order.
    pub fn child_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.children.len()).collect();
        order.sort_by_key(|&index| self.children[index].1.weight);
        order
    }

    pub fn children_in_order(&self) -> impl Iterator<Item = (&str, &RenderNode)> {
        self.child_order().into_iter().map(|index| {
            let (key, child) = &self.children[index];
            (key.as_str(), child)
        })
    }

    /// Strip cache and post-render metadata from this node and all descendants.
    ///
    /// The node keeps its structure, markup and attached assets.
    pub fn take_metadata(&mut self) -> RecursionStorage {
        let mut storage = RecursionStorage {
            cache: std::mem::take(&mut self.cache),
            attached: Attached::new(),
            post_render_cache: std::mem::take(&mut self.post_render_cache),
        };

        for index in self.child_order() {
            let nested = self.children[index].1.take_metadata();
            storage.cache.merge(&nested.cache);
            storage.post_render_cache.merge(nested.post_render_cache);
        }

        if let Some(carried) = self.recursion_storage.as_mut() {
            storage.cache.merge(&std::mem::take(&mut carried.cache));
            storage
                .post_render_cache
                .merge(std::mem::take(&mut carried.post_render_cache));
            if carried.attached.is_empty() {
                self.recursion_storage = None;
            }
        }

        storage
    }

    /// Owned form of [`RenderNode::take_metadata`].
    pub fn extract_metadata(mut self) -> (RenderNode, RecursionStorage) {
        let storage = self.take_metadata();
        (self, storage)
    }

    /// Attached assets of the whole tree: own assets first, then children by
    /// weight, then carried storage.
    pub fn collect_attached(&self) -> Attached {
        let mut attached = self.attached.clone();
        for (_, child) in self.children_in_order() {
            attached.merge(&child.collect_attached());
        }
        if let Some(carried) = self.recursion_storage.as_ref() {
            attached.merge(&carried.attached);
        }
        attached
    }

    /// Like [`RenderNode::collect_attached`] but removes the assets from the tree.
    pub fn take_attached(&mut self) -> Attached {
        let mut attached = std::mem::take(&mut self.attached);
        for index in self.child_order() {
            let nested = self.children[index].1.take_attached();
            attached.merge(&nested);
        }
        if let Some(carried) = self.recursion_storage.as_mut() {
            attached.merge(&std::mem::take(&mut carried.attached));
            if carried.is_empty() {
                self.recursion_storage = None;
            }
        }
        attached
    }

    /// Merge collected storage back onto this node's top level.
    pub fn absorb(&mut self, storage: RecursionStorage) {
        self.cache.merge(&storage.cache);
        self.attached.merge(&storage.attached);
        self.post_render_cache.merge(storage.post_render_cache);
    }

    /// Attach storage captured while rendering this node.
    pub fn carry(&mut self, storage: RecursionStorage) {
        match self.recursion_storage.as_mut() {
            Some(carried) => carried.merge(storage),
            None => self.recursion_storage = Some(Box::new(storage)),
        }
    }
}
