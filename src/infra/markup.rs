//! Default host evaluator for render trees.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use crate::application::error::AppError;
use crate::cache::stack::MarkupRenderer;
use crate::cache::store::{CacheStore, CachedRender};
use crate::domain::render::RenderNode;
use crate::domain::types::Expire;

/// Concatenates node markup with children in weight order.
///
/// With a store attached, nodes stamped for late rendering are written to it
/// as soon as they are printed.
#[derive(Default)]
pub struct TreeMarkupRenderer {
    store: Option<Arc<dyn CacheStore>>,
}

impl TreeMarkupRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<dyn CacheStore>) -> Self {
        Self { store: Some(store) }
    }

    fn render_node(&self, node: &mut RenderNode) -> Result<String, AppError> {
        if node.printed {
            return Ok(String::new());
        }

        let mut output = node.markup.clone().unwrap_or_default();
        for index in node.child_order() {
            let child = &mut node.children[index].1;
            output.push_str(&self.render_node(child)?);
        }
        node.printed = true;

        if let Some(stamp) = node.stamp.take()
            && let Some(store) = self.store.as_ref()
        {
            let mut metadata = node.clone().take_metadata();
            metadata.cache.tags.merge(&stamp.tags);
            metadata.attached = node.collect_attached();
            let data = CachedRender {
                node: RenderNode::markup(output.clone()),
                metadata,
                preserved: BTreeMap::new(),
            };
            store.set(&stamp.cid, data, &stamp.bin, Expire::Permanent)?;
            counter!(
                "render_cache_store_total",
                "bin" => stamp.bin.clone(),
                "strategy" => "late_render"
            )
            .increment(1);
            debug!(bin = %stamp.bin, cid = %stamp.cid, "Stored late rendered entry");
        }

        Ok(output)
    }
}

impl MarkupRenderer for TreeMarkupRenderer {
    fn render(&self, node: &mut RenderNode) -> Result<String, AppError> {
        self.render_node(node)
    }
}
