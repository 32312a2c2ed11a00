//! Render caching for content entities.

use std::sync::Arc;

use crate::cache::info::{CacheHash, CacheInfo};
use crate::cache::resolver::{CacheInfoProvider, base_cache_hash, base_cache_keys, base_cache_tags};
use crate::domain::context::Context;
use crate::domain::entities::EntityRecord;
use crate::domain::error::DomainError;
use crate::domain::tags::CacheTags;

use super::{Build, Controller, Objects, base_is_cacheable};
use crate::application::error::AppError;
use crate::application::service::Renderer;

pub const ENTITY_KIND: &str = "entity";

/// Host view builder for entities of every type.
///
/// The shared context carries `entity_type`, `view_mode` and `langcode`.
pub trait EntityViewBuilder: Send + Sync {
    fn view(
        &self,
        entities: &Objects<EntityRecord>,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Build, AppError>;
}

pub struct EntityController {
    builder: Arc<dyn EntityViewBuilder>,
}

impl EntityController {
    pub fn new(builder: Arc<dyn EntityViewBuilder>) -> Self {
        Self { builder }
    }
}

impl CacheInfoProvider for EntityController {
    type Object = EntityRecord;

    fn kind(&self) -> &str {
        ENTITY_KIND
    }

    fn cache_context(&self, entity: &EntityRecord, mut context: Context) -> Result<Context, DomainError> {
        context.insert_default("entity_type", entity.entity_type.clone());
        context.insert_default("entity_id", entity.id.clone());
        context.insert_default("entity_revision_id", entity.revision_id.clone());
        let bundle = entity
            .bundle
            .clone()
            .filter(|bundle| !bundle.is_empty())
            .unwrap_or_else(|| entity.entity_type.clone());
        context.insert_default("bundle", bundle);
        Ok(context)
    }

    fn cache_keys(&self, _entity: &EntityRecord, context: &Context) -> Result<Vec<String>, DomainError> {
        let mut keys = base_cache_keys(self.kind());
        keys.push(context.require("entity_type")?);
        keys.push(context.require("view_mode")?);
        Ok(keys)
    }

    fn cache_hash(&self, entity: &EntityRecord, context: &Context) -> Result<CacheHash, DomainError> {
        let mut hash = base_cache_hash(context)?;
        hash.insert("entity_id", context.require("entity_id")?);
        hash.insert(
            "entity_revision_id",
            context.get_string("entity_revision_id").unwrap_or_default(),
        );
        hash.insert("bundle", context.require("bundle")?);
        hash.insert("langcode", context.require("langcode")?);
        hash.insert("modified", entity.changed);
        Ok(hash)
    }

    fn cache_tags(&self, _entity: &EntityRecord, context: &Context) -> Result<CacheTags, DomainError> {
        let entity_type = context.require("entity_type")?;
        let mut tags = base_cache_tags(self.kind());
        tags.insert(entity_type.clone(), context.require("entity_id")?);
        tags.insert_flag(format!("{entity_type}_view"));
        Ok(tags)
    }
}

impl Controller for EntityController {
    fn is_cacheable(&self, default: &CacheInfo, context: &Context, renderer: &Renderer<'_>) -> bool {
        let scope_enabled = context
            .get_string("entity_type")
            .is_none_or(|entity_type| renderer.config().scope_enabled(ENTITY_KIND, &entity_type));
        scope_enabled && base_is_cacheable(self.kind(), default, context, renderer)
    }

    fn render(
        &self,
        entities: &Objects<EntityRecord>,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Build, AppError> {
        self.builder.view(entities, context, renderer)
    }
}
