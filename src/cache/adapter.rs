//! Backend adapter between controllers and the cache store.
//!
//! Converts render trees to persisted entries and back according to each
//! object's cache strategy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, instrument, trace};

use crate::application::error::AppError;
use crate::domain::render::{CacheStamp, RenderNode};
use crate::domain::types::CacheStrategy;

use super::info::CacheInfo;
use super::stack::{MarkupRenderer, RenderStack};
use super::store::{CacheStore, CachedRender};
use super::validate::{AcceptAll, ValidationStrategy};

pub struct BackendAdapter {
    store: Arc<dyn CacheStore>,
    validator: Arc<dyn ValidationStrategy>,
}

impl BackendAdapter {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            validator: Arc::new(AcceptAll),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn ValidationStrategy>) -> Self {
        self.validator = validator;
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Single-object form of [`BackendAdapter::get_multiple`].
    pub fn get(&self, info: &CacheInfo) -> Result<Option<RenderNode>, AppError> {
        let mut found = self.get_multiple(&[("0".to_string(), info.clone())])?;
        Ok(found.remove("0"))
    }

    /// Fetch cached nodes for every object with a cache id.
    ///
    /// Objects are grouped by bin so each bin is queried once. Entries the
    /// validation strategy rejects count as misses; rejected late-render
    /// entries are removed from the store as well.
    #[instrument(skip_all, fields(objects = infos.len()))]
    pub fn get_multiple(
        &self,
        infos: &[(String, CacheInfo)],
    ) -> Result<HashMap<String, RenderNode>, AppError> {
        let mut bins: BTreeMap<&str, BTreeMap<&str, Vec<usize>>> = BTreeMap::new();
        for (index, (_, info)) in infos.iter().enumerate() {
            if let Some(cid) = info.cid.as_deref() {
                bins.entry(info.bin.as_str())
                    .or_default()
                    .entry(cid)
                    .or_default()
                    .push(index);
            }
        }

        let mut build = HashMap::new();
        for (bin, by_cid) in bins {
            let cids: Vec<String> = by_cid.keys().map(|cid| cid.to_string()).collect();
            let mut entries = self.store.get_multiple(&cids, bin)?;

            for (cid, indexes) in by_cid {
                let Some(entry) = entries.remove(cid) else {
                    counter!("render_cache_miss_total", "bin" => bin.to_string())
                        .increment(indexes.len() as u64);
                    continue;
                };

                let (_, first_info) = &infos[indexes[0]];
                if !self.validator.validate(&entry, first_info) {
                    counter!("render_cache_invalid_total", "bin" => bin.to_string()).increment(1);
                    debug!(bin, cid, "Cached entry failed validation");
                    if first_info.strategy() == CacheStrategy::LateRender {
                        self.store.clear(cid, bin)?;
                    }
                    continue;
                }

                counter!("render_cache_hit_total", "bin" => bin.to_string())
                    .increment(indexes.len() as u64);
                trace!(bin, cid, "Render cache hit");
                // Objects sharing an id share the entry.
                let node = entry.data.into_node();
                for index in indexes {
                    build.insert(infos[index].0.clone(), node.clone());
                }
            }
        }

        Ok(build)
    }

    /// Prepare a freshly built node for storage, store it when it has a
    /// cache id and return the node to hand back to the caller.
    ///
    /// * `NoRender` stores the stripped tree.
    /// * `DirectRender` renders to markup first and stores markup plus
    ///   collected metadata.
    /// * `LateRender` stamps the node so the host evaluator stores it.
    ///
    /// The strategy transformation is applied even without a cache id.
    pub fn set(
        &self,
        node: RenderNode,
        info: &CacheInfo,
        stack: &mut RenderStack,
        markup: &dyn MarkupRenderer,
    ) -> Result<RenderNode, AppError> {
        match info.strategy() {
            CacheStrategy::NoRender => {
                let preserved = preserve_properties(&node, info);
                let (node, mut metadata) = node.extract_metadata();
                metadata.cache.tags.merge(&info.tags);
                let data = CachedRender {
                    node,
                    metadata,
                    preserved,
                };
                self.persist(&data, info)?;
                Ok(data.into_node())
            }
            CacheStrategy::DirectRender => {
                let preserved = preserve_properties(&node, info);
                let mut rendered = stack.render(node, |_, node| markup.render(node))?;
                let mut metadata = rendered.take_metadata();
                metadata.cache.tags.merge(&info.tags);
                let attached = rendered.take_attached();
                let mut stored = RenderNode::new();
                stored.markup = rendered.markup;
                stored.attached = attached;
                let data = CachedRender {
                    node: stored,
                    metadata,
                    preserved,
                };
                self.persist(&data, info)?;
                Ok(data.into_node())
            }
            CacheStrategy::LateRender => {
                let (mut node, mut metadata) = node.extract_metadata();
                metadata.cache.tags.merge(&info.tags);
                let tags = metadata.cache.tags.clone();
                node.absorb(metadata);
                if let Some(cid) = info.cid.as_ref() {
                    node.stamp = Some(CacheStamp {
                        cid: cid.clone(),
                        keys: info.keys.clone(),
                        bin: info.bin.clone(),
                        tags,
                    });
                }
                Ok(node)
            }
        }
    }

    /// Apply [`BackendAdapter::set`] to every built object that has cache
    /// info. Nodes without info pass through untouched.
    pub fn set_multiple(
        &self,
        build: Vec<(String, RenderNode)>,
        infos: &HashMap<String, CacheInfo>,
        stack: &mut RenderStack,
        markup: &dyn MarkupRenderer,
    ) -> Result<Vec<(String, RenderNode)>, AppError> {
        build
            .into_iter()
            .map(|(id, node)| match infos.get(&id) {
                Some(info) => Ok((id, self.set(node, info, stack, markup)?)),
                None => Ok((id, node)),
            })
            .collect()
    }

    fn persist(&self, data: &CachedRender, info: &CacheInfo) -> Result<(), AppError> {
        let Some(cid) = info.cid.as_deref() else {
            return Ok(());
        };
        self.store.set(cid, data.clone(), &info.bin, info.expire)?;
        counter!(
            "render_cache_store_total",
            "bin" => info.bin.clone(),
            "strategy" => info.strategy().as_str()
        )
        .increment(1);
        debug!(bin = %info.bin, cid, strategy = info.strategy().as_str(), "Stored render cache entry");
        Ok(())
    }
}

/// Top-level properties of `node` named by the info's preserve list.
pub fn preserve_properties(node: &RenderNode, info: &CacheInfo) -> BTreeMap<String, Value> {
    info.preserve_properties
        .iter()
        .filter_map(|key| {
            node.properties
                .get(key)
                .map(|value| (key.clone(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::cache::info::{MarkupOptions, RenderToMarkup};
    use crate::cache::store::MemoryStore;
    use crate::cache::validate::MaxAgeValidation;
    use crate::domain::tags::CacheTags;

    struct Concat;

    impl MarkupRenderer for Concat {
        fn render(&self, node: &mut RenderNode) -> Result<String, AppError> {
            let mut out = node.markup.clone().unwrap_or_default();
            for (_, child) in node.children_in_order() {
                out.push_str(child.markup.as_deref().unwrap_or_default());
            }
            node.printed = true;
            Ok(out)
        }
    }

    fn info(cid: Option<&str>, render_to_markup: RenderToMarkup) -> CacheInfo {
        let mut info = CacheInfo::new("cache_render");
        info.cid = cid.map(str::to_string);
        info.render_to_markup = render_to_markup;
        info.tags = CacheTags::new().flag("rendered");
        info.finalize();
        info
    }

    fn adapter() -> (Arc<MemoryStore>, BackendAdapter) {
        let store = Arc::new(MemoryStore::new(NonZeroUsize::new(16).expect("non-zero")));
        let adapter = BackendAdapter::new(store.clone());
        (store, adapter)
    }

    fn node() -> RenderNode {
        RenderNode::markup("<p>")
            .with_tags(CacheTags::new().with("node", 1))
            .with_asset("css", "node.css")
            .with_property("title", Value::from("Hello"))
            .with_child("body", RenderNode::markup("body</p>").with_tags(CacheTags::new().with("user", 2)))
    }

    #[test]
    fn direct_render_stores_markup_and_metadata() {
        let (store, adapter) = adapter();
        let mut stack = RenderStack::new();
        let info = info(
            Some("cid"),
            RenderToMarkup::Options(MarkupOptions {
                cache_late: false,
                preserve_properties: vec!["title".to_string()],
            }),
        );

        let returned = adapter.set(node(), &info, &mut stack, &Concat).expect("set");
        assert_eq!(returned.markup.as_deref(), Some("<p>body</p>"));
        assert!(returned.children.is_empty());
        assert!(returned.cache.tags.contains("node", "1"));
        assert!(returned.cache.tags.contains("user", "2"));
        assert!(returned.cache.tags.has_namespace("rendered"));
        assert_eq!(returned.properties["title"], Value::from("Hello"));
        assert_eq!(store.len(), 1);

        let hit = adapter.get(&info).expect("get").expect("hit");
        assert_eq!(hit, returned);
        assert_eq!(stack.recursion_level(), 0);
    }

    #[test]
    fn no_render_stores_stripped_tree() {
        let (_, adapter) = adapter();
        let mut stack = RenderStack::new();
        let info = info(Some("cid"), RenderToMarkup::Disabled);

        let returned = adapter.set(node(), &info, &mut stack, &Concat).expect("set");
        assert_eq!(returned.children.len(), 1);
        assert!(returned.children[0].1.cache.is_empty());
        assert!(returned.cache.tags.contains("user", "2"));

        let hit = adapter.get(&info).expect("get").expect("hit");
        assert_eq!(hit.children.len(), 1);
        assert!(hit.cache.tags.contains("node", "1"));
    }

    #[test]
    fn late_render_stamps_without_storing() {
        let (store, adapter) = adapter();
        let mut stack = RenderStack::new();
        let info = info(
            Some("cid"),
            RenderToMarkup::Options(MarkupOptions {
                cache_late: true,
                preserve_properties: Vec::new(),
            }),
        );

        let returned = adapter.set(node(), &info, &mut stack, &Concat).expect("set");
        let stamp = returned.stamp.expect("stamp");
        assert_eq!(stamp.cid, "cid");
        assert_eq!(stamp.bin, "cache_render");
        assert!(stamp.tags.contains("node", "1"));
        assert!(stamp.tags.contains("user", "2"));
        assert!(stamp.tags.has_namespace("rendered"));
        assert!(store.is_empty());
    }

    #[test]
    fn missing_cid_transforms_without_storing() {
        let (store, adapter) = adapter();
        let mut stack = RenderStack::new();
        let info = info(None, RenderToMarkup::Enabled);

        let returned = adapter.set(node(), &info, &mut stack, &Concat).expect("set");
        assert_eq!(returned.markup.as_deref(), Some("<p>body</p>"));
        assert!(store.is_empty());
    }

    #[test]
    fn shared_cid_serves_every_object() {
        let (_, adapter) = adapter();
        let mut stack = RenderStack::new();
        let info = info(Some("shared"), RenderToMarkup::Enabled);
        adapter.set(node(), &info, &mut stack, &Concat).expect("set");

        let found = adapter
            .get_multiple(&[("a".to_string(), info.clone()), ("b".to_string(), info.clone())])
            .expect("get");
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], found["b"]);
    }

    #[test]
    fn invalid_late_entries_are_cleared() {
        let (store, adapter) = adapter();
        let adapter = adapter.with_validator(Arc::new(MaxAgeValidation));
        let mut late = info(
            Some("late"),
            RenderToMarkup::Options(MarkupOptions {
                cache_late: true,
                preserve_properties: Vec::new(),
            }),
        );
        late.finalize();
        let mut data = CachedRender {
            node: RenderNode::markup("stale"),
            metadata: Default::default(),
            preserved: BTreeMap::new(),
        };
        data.metadata.cache.max_age.push(0);
        store
            .set("late", data, "cache_render", late.expire)
            .expect("seed");

        assert!(adapter.get(&late).expect("get").is_none());
        assert!(store.is_empty());
    }
}
