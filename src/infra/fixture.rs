//! JSON fixtures describing a site to render, plus host builders backed by
//! them.
//!
//! A fixture lists entities, the main content of the page and the blocks of
//! each region. Blocks may embed entities, which gives the nesting page →
//! block → entity the recursion stack exists for.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::application::controller::{
    Build, BlockBuilder, BlockController, Controller, EntityController, EntityViewBuilder,
    Objects, PageBuilder, PageController,
};
use crate::application::error::AppError;
use crate::application::service::{
    DeferredPlaceholder, RenderCacheService, RenderCacheServiceBuilder, Renderer,
};
use crate::cache::hooks::{AlterEvent, CacheInfoAlter};
use crate::cache::info::CacheInfo;
use crate::cache::resolver::{ResolveEnv, ResolvePass, resolve_cache_info};
use crate::domain::context::Context;
use crate::domain::entities::{BlockRecord, EntityRecord, PageRecord};
use crate::domain::render::RenderNode;
use crate::domain::request::RequestInfo;
use crate::domain::types::Granularity;

use super::error::InfraError;

fn default_page_callback() -> String {
    "node_page_default".to_string()
}

fn default_view_mode() -> String {
    "full".to_string()
}

fn default_block_view_mode() -> String {
    "teaser".to_string()
}

fn default_langcode() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFixture {
    #[serde(default = "default_view_mode")]
    pub view_mode: String,
    #[serde(default)]
    pub entities: Vec<EntityRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockFixture {
    pub bid: String,
    pub module: String,
    pub delta: String,
    #[serde(default)]
    pub cache: Option<Granularity>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub context: Option<String>,
    /// Entities rendered inside the block.
    #[serde(default)]
    pub entities: Vec<EntityRef>,
    #[serde(default = "default_block_view_mode")]
    pub view_mode: String,
}

impl BlockFixture {
    fn record(&self, region: &str) -> BlockRecord {
        BlockRecord {
            bid: self.bid.clone(),
            module: self.module.clone(),
            delta: self.delta.clone(),
            region: region.to_string(),
            cache: self.cache,
            body: self.body.clone(),
            context: self.context.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionFixture {
    pub name: String,
    #[serde(default)]
    pub blocks: Vec<BlockFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub request: RequestInfo,
    #[serde(default = "default_page_callback")]
    pub page_callback: String,
    #[serde(default = "default_langcode")]
    pub langcode: String,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub content: Option<ContentFixture>,
    #[serde(default)]
    pub regions: Vec<RegionFixture>,
    /// Render strategies per entity type; matching entities are deferred
    /// behind placeholders.
    #[serde(default)]
    pub deferred: BTreeMap<String, Vec<String>>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self, InfraError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
            .map_err(|err| InfraError::fixture(format!("{}: {err}", path.display())))
    }

    pub fn from_json(raw: &str) -> Result<Self, InfraError> {
        serde_json::from_str(raw).map_err(|err| InfraError::fixture(err.to_string()))
    }

    fn entity_index(&self) -> HashMap<EntityRef, EntityRecord> {
        self.entities
            .iter()
            .map(|entity| {
                let key = EntityRef {
                    entity_type: entity.entity_type.clone(),
                    id: entity.id.clone(),
                };
                (key, entity.clone())
            })
            .collect()
    }
}

/// Renders entities as `<article>` elements with a per-type stylesheet.
pub struct FixtureEntityBuilder;

impl EntityViewBuilder for FixtureEntityBuilder {
    fn view(
        &self,
        entities: &Objects<EntityRecord>,
        context: &Context,
        _renderer: &mut Renderer<'_>,
    ) -> Result<Build, AppError> {
        let view_mode = context.get_string("view_mode").unwrap_or_else(default_view_mode);
        Ok(entities
            .iter()
            .map(|(id, entity)| {
                let markup = format!(
                    "<article class=\"{} {view_mode}\"><h2>{}</h2>{}</article>",
                    entity.entity_type, entity.label, entity.body
                );
                let node = RenderNode::markup(markup)
                    .with_asset("css", format!("{}.css", entity.entity_type));
                (id.clone(), node)
            })
            .collect())
    }
}

/// Renders blocks and the entities embedded in them.
pub struct FixtureBlockBuilder {
    entities: Arc<EntityController>,
    index: HashMap<EntityRef, EntityRecord>,
    embedded: HashMap<String, (Vec<EntityRef>, String)>,
    langcode: String,
}

impl BlockBuilder for FixtureBlockBuilder {
    fn build(
        &self,
        block: &BlockRecord,
        _context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Option<RenderNode>, AppError> {
        let mut node = RenderNode::markup(format!(
            "<div class=\"block block-{}\" id=\"block-{}\">",
            block.module, block.bid
        ))
        .with_asset("css", "block.css");
        if !block.body.is_empty() {
            node = node.with_child("body", RenderNode::markup(block.body.clone()));
        }

        if let Some((refs, view_mode)) = self.embedded.get(&block.bid) {
            for (entity_type, records) in group_by_type(refs, &self.index) {
                let context = Context::new()
                    .with("entity_type", entity_type)
                    .with("view_mode", view_mode.clone())
                    .with("langcode", self.langcode.clone());
                for (key, child) in self.entities.view(&records, &context, renderer)? {
                    node = node.with_child(key, child);
                }
            }
        }

        if node.children.is_empty() && block.body.is_empty() {
            return Ok(None);
        }
        Ok(Some(node.with_child(
            "close",
            RenderNode::markup("</div>").with_weight(i32::MAX),
        )))
    }
}

/// Wraps the page content in a minimal document.
pub struct FixturePageBuilder;

impl PageBuilder for FixturePageBuilder {
    fn build_page(
        &self,
        page: &PageRecord,
        _context: &Context,
        _renderer: &mut Renderer<'_>,
    ) -> Result<RenderNode, AppError> {
        Ok(RenderNode::markup("<html><body>")
            .with_child("content", page.content.clone())
            .with_child("close", RenderNode::markup("</body></html>").with_weight(i32::MAX)))
    }
}

/// Defers entities of the configured types behind placeholders.
pub struct DeferEntityTypes {
    strategies: BTreeMap<String, Vec<String>>,
}

impl CacheInfoAlter for DeferEntityTypes {
    fn alter_cache_info(&self, info: &mut CacheInfo, context: &Context) {
        let Some(entity_type) = context.get_string("entity_type") else {
            return;
        };
        if let Some(strategies) = self.strategies.get(&entity_type) {
            info.render_strategy = strategies.clone();
        }
    }

    fn events(&self) -> &[AlterEvent] {
        &[AlterEvent::CacheInfo]
    }

    fn name(&self) -> &str {
        "defer_entity_types"
    }
}

/// Outcome of rendering a fixture once.
#[derive(Debug, Clone)]
pub struct FixtureRender {
    pub markup: String,
    pub cache_tags_header: Option<String>,
    pub deferred: Vec<DeferredPlaceholder>,
    pub attached: Vec<(String, Vec<String>)>,
}

/// Cache identity of one fixture object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyReport {
    pub kind: String,
    pub id: String,
    pub cid: Option<String>,
    pub placeholder_id: Option<String>,
}

/// Controllers wired to the fixture builders.
pub struct FixtureSite {
    fixture: Fixture,
    pub entities: Arc<EntityController>,
    pub blocks: Arc<BlockController>,
    pub pages: Arc<PageController>,
}

impl FixtureSite {
    pub fn new(fixture: Fixture) -> Self {
        let entities = Arc::new(EntityController::new(Arc::new(FixtureEntityBuilder)));
        let embedded = fixture
            .regions
            .iter()
            .flat_map(|region| &region.blocks)
            .map(|block| (block.bid.clone(), (block.entities.clone(), block.view_mode.clone())))
            .collect();
        let blocks = Arc::new(BlockController::new(Arc::new(FixtureBlockBuilder {
            entities: Arc::clone(&entities),
            index: fixture.entity_index(),
            embedded,
            langcode: fixture.langcode.clone(),
        })));
        let pages = Arc::new(PageController::new(Arc::new(FixturePageBuilder)));

        Self {
            fixture,
            entities,
            blocks,
            pages,
        }
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    /// Register the fixture controllers and listeners.
    pub fn register(&self, builder: RenderCacheServiceBuilder) -> RenderCacheServiceBuilder {
        let mut builder = builder
            .controller(Arc::clone(&self.entities))
            .controller(Arc::clone(&self.blocks))
            .controller(Arc::clone(&self.pages));
        if !self.fixture.deferred.is_empty() {
            builder = builder.alter(
                "entity",
                Arc::new(DeferEntityTypes {
                    strategies: self.fixture.deferred.clone(),
                }),
            );
        }
        builder
    }

    /// Render the whole page for one request.
    #[instrument(skip_all, fields(page_callback = %self.fixture.page_callback))]
    pub fn render(&self, service: &RenderCacheService) -> Result<FixtureRender, AppError> {
        let index = self.fixture.entity_index();
        let mut scope = service.begin_request(self.fixture.request.clone());
        let mut page_node = {
            let mut renderer = service.renderer(&mut scope);
            self.pages.begin_request(&mut renderer);

            let mut content = RenderNode::new();
            if let Some(main) = self.fixture.content.as_ref() {
                for (entity_type, records) in group_by_type(&main.entities, &index) {
                    let context = Context::new()
                        .with("entity_type", entity_type)
                        .with("view_mode", main.view_mode.clone())
                        .with("langcode", self.fixture.langcode.clone());
                    for (key, child) in self.entities.view(&records, &context, &mut renderer)? {
                        content = content.with_child(key, child);
                    }
                }
            }

            for region in &self.fixture.regions {
                let records: Vec<(String, BlockRecord)> = region
                    .blocks
                    .iter()
                    .map(|block| (block.bid.clone(), block.record(&region.name)))
                    .collect();
                let context = Context::new().with("region", region.name.clone());
                let mut region_node = RenderNode::new();
                for (key, child) in self.blocks.view(&records, &context, &mut renderer)? {
                    region_node = region_node.with_child(key, child);
                }
                content = content.with_child(region.name.clone(), region_node);
            }

            let page = PageRecord {
                callback: self.fixture.page_callback.clone(),
                content,
            };
            let context = Context::new().with("page_callback", page.callback.clone());
            let mut build = self.pages.view(&[("page".to_string(), page)], &context, &mut renderer)?;
            build.pop().map(|(_, node)| node).unwrap_or_default()
        };

        let attached = page_node
            .collect_attached()
            .iter()
            .map(|(kind, items)| (kind.to_string(), items.to_vec()))
            .collect();
        let markup = {
            let mut renderer = service.renderer(&mut scope);
            renderer.render_markup(&mut page_node)?
        };
        let header = scope
            .cache_tags_header()
            .map(|(_, value)| value.to_string());
        let deferred = scope.take_deferred_placeholders();
        debug!(deferred = deferred.len(), bytes = markup.len(), "Rendered fixture page");

        Ok(FixtureRender {
            markup,
            cache_tags_header: header,
            deferred,
            attached,
        })
    }

    /// Resolve the cache identity of every object without rendering.
    pub fn cache_keys(&self, service: &RenderCacheService) -> Result<Vec<KeyReport>, AppError> {
        let index = self.fixture.entity_index();
        let mut scope = service.begin_request(self.fixture.request.clone());
        let renderer = service.renderer(&mut scope);
        let mut reports = Vec::new();

        if let Some(main) = self.fixture.content.as_ref() {
            for (entity_type, records) in group_by_type(&main.entities, &index) {
                let context = Context::new()
                    .with("entity_type", entity_type)
                    .with("view_mode", main.view_mode.clone())
                    .with("langcode", self.fixture.langcode.clone());
                reports.extend(resolve_reports(self.entities.as_ref(), &records, &context, &renderer)?);
            }
        }

        for region in &self.fixture.regions {
            let records: Vec<(String, BlockRecord)> = region
                .blocks
                .iter()
                .map(|block| (block.bid.clone(), block.record(&region.name)))
                .collect();
            let context = Context::new().with("region", region.name.clone());
            reports.extend(resolve_reports(self.blocks.as_ref(), &records, &context, &renderer)?);
        }

        let page = PageRecord {
            callback: self.fixture.page_callback.clone(),
            content: RenderNode::new(),
        };
        let context = Context::new().with("page_callback", page.callback.clone());
        reports.extend(resolve_reports(
            self.pages.as_ref(),
            &[("page".to_string(), page)],
            &context,
            &renderer,
        )?);

        Ok(reports)
    }
}

fn resolve_reports<C: Controller>(
    controller: &C,
    objects: &Objects<C::Object>,
    context: &Context,
    renderer: &Renderer<'_>,
) -> Result<Vec<KeyReport>, AppError> {
    let service = renderer.service();
    let config = renderer.config();
    let kind = controller.kind().to_string();

    let mut default = controller.default_cache_info(context, config);
    service.alters().alter_default_cache_info(&kind, &mut default, context);
    let cacheable = controller.is_cacheable(&default, context, renderer);
    let env = ResolveEnv {
        alters: service.alters(),
        request: renderer.request(),
        algorithm: config.hash_algorithm,
        pass: ResolvePass::Initial,
    };

    objects
        .iter()
        .map(|(id, object)| {
            let object_context = context.clone().with("id", id.clone());
            let (info, _) = resolve_cache_info(controller, object, object_context, &default, &env)?;
            Ok(KeyReport {
                kind: kind.clone(),
                id: id.clone(),
                cid: info.cid.filter(|_| cacheable),
                placeholder_id: info.placeholder_id,
            })
        })
        .collect()
}

/// Look up referenced entities, grouped by type in first-seen order. Unknown
/// references are skipped.
fn group_by_type(
    refs: &[EntityRef],
    index: &HashMap<EntityRef, EntityRecord>,
) -> Vec<(String, Vec<(String, EntityRecord)>)> {
    let mut groups: Vec<(String, Vec<(String, EntityRecord)>)> = Vec::new();
    for reference in refs {
        let Some(record) = index.get(reference) else {
            debug!(entity_type = %reference.entity_type, id = %reference.id, "Skipping unknown entity");
            continue;
        };
        let entry = (reference.id.clone(), record.clone());
        match groups.iter_mut().find(|(entity_type, _)| *entity_type == reference.entity_type) {
            Some((_, records)) => records.push(entry),
            None => groups.push((reference.entity_type.clone(), vec![entry])),
        }
    }
    groups
}
