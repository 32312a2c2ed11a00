//! Render caching for blocks.
//!
//! Each block renders inside its own recursion frame. [`RenderStack::recursion_step`]
//! hands the frame's storage to the block as soon as it is built.
//!
//! [`RenderStack::recursion_step`]: crate::cache::stack::RenderStack::recursion_step

use std::sync::Arc;

use crate::cache::config::RenderCacheConfig;
use crate::cache::info::{CacheHash, CacheInfo, RenderToMarkup};
use crate::cache::resolver::{CacheInfoProvider, base_cache_keys, base_cache_tags};
use crate::domain::context::Context;
use crate::domain::entities::BlockRecord;
use crate::domain::error::DomainError;
use crate::domain::render::RenderNode;
use crate::domain::tags::CacheTags;
use crate::domain::types::Granularity;

use super::{Build, Controller, Objects, base_default_cache_info, base_is_cacheable};
use crate::application::error::AppError;
use crate::application::service::Renderer;

pub const BLOCK_KIND: &str = "block";

/// Host block builder. Returns `None` for a block with nothing to show.
pub trait BlockBuilder: Send + Sync {
    fn build(
        &self,
        block: &BlockRecord,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Option<RenderNode>, AppError>;
}

pub struct BlockController {
    builder: Arc<dyn BlockBuilder>,
}

impl BlockController {
    pub fn new(builder: Arc<dyn BlockBuilder>) -> Self {
        Self { builder }
    }
}

impl CacheInfoProvider for BlockController {
    type Object = BlockRecord;

    fn kind(&self) -> &str {
        BLOCK_KIND
    }

    fn cache_context(&self, block: &BlockRecord, mut context: Context) -> Result<Context, DomainError> {
        context.insert_default("region", block.region.clone());
        context.insert_default("bid", block.bid.clone());
        context.insert_default("delta", block.delta.clone());
        context.insert_default("module", block.module.clone());
        Ok(context)
    }

    fn apply_cache_info(&self, block: &BlockRecord, _context: &Context, info: &mut CacheInfo) {
        info.granularity = Some(block.cache.unwrap_or(Granularity::NO_CACHE));
    }

    fn cache_keys(&self, _block: &BlockRecord, context: &Context) -> Result<Vec<String>, DomainError> {
        let mut keys = base_cache_keys(self.kind());
        keys.push(context.require("region")?);
        keys.push(context.require("module")?);
        keys.push(context.require("delta")?);
        Ok(keys)
    }

    // Module and delta identify a block across placements; the object id is
    // deliberately left out.
    fn cache_hash(&self, block: &BlockRecord, context: &Context) -> Result<CacheHash, DomainError> {
        let mut hash = CacheHash::new()
            .with("module", context.require("module")?)
            .with("delta", context.require("delta")?);
        if let Some(name) = block.context.as_deref().filter(|name| !name.is_empty()) {
            hash.insert("context", name);
        }
        Ok(hash)
    }

    fn cache_tags(&self, _block: &BlockRecord, context: &Context) -> Result<CacheTags, DomainError> {
        Ok(base_cache_tags(self.kind()).with("block", context.require("id")?))
    }
}

impl Controller for BlockController {
    fn default_cache_info(&self, _context: &Context, config: &RenderCacheConfig) -> CacheInfo {
        let mut info = base_default_cache_info(config);
        info.render_to_markup = RenderToMarkup::Enabled;
        info
    }

    fn is_cacheable(&self, default: &CacheInfo, context: &Context, renderer: &Renderer<'_>) -> bool {
        let scope_enabled = context
            .get_string("region")
            .is_none_or(|region| renderer.config().scope_enabled(BLOCK_KIND, &region));
        scope_enabled && base_is_cacheable(self.kind(), default, context, renderer)
    }

    fn render(
        &self,
        blocks: &Objects<BlockRecord>,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Build, AppError> {
        let mut build = Vec::with_capacity(blocks.len());
        for (id, block) in blocks {
            let node = self.builder.build(block, context, renderer)?;
            let mut node = node.unwrap_or_default();
            renderer.stack_mut().recursion_step(&mut node);
            if !node.is_empty() {
                build.push((id.clone(), node));
            }
        }
        Ok(build)
    }
}
