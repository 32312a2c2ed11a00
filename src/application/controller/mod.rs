//! Render controllers.
//!
//! A controller turns a batch of objects of one kind into render nodes,
//! serving what it can from the cache, deferring placeholder objects and
//! rendering the rest inside recursion frames so nested metadata bubbles up.

pub mod block;
pub mod entity;
pub mod page;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::cache::config::RenderCacheConfig;
use crate::cache::hooks::AlterEvent;
use crate::cache::info::CacheInfo;
use crate::cache::placeholder::get_placeholder;
use crate::cache::resolver::{CacheInfoProvider, ResolveEnv, ResolvePass, resolve_cache_info};
use crate::domain::context::Context;
use crate::domain::render::{RecursionStorage, RenderNode};
use crate::domain::tags::CacheTags;
use crate::domain::types::Granularity;

use super::error::AppError;
use super::placeholder::RENDER_PLACEHOLDERS_FUNCTION;
use super::service::Renderer;
use super::strategy::PlaceholderObject;

pub use block::{BlockBuilder, BlockController};
pub use entity::{EntityController, EntityViewBuilder};
pub use page::{PageBuilder, PageController};

/// Ordered `(id, value)` pairs; order is preserved through every view.
pub type Objects<T> = [(String, T)];

/// Rendered output in input order. Objects that rendered to nothing are
/// absent.
pub type Build = Vec<(String, RenderNode)>;

pub trait Controller: CacheInfoProvider + Send + Sync {
    /// Cache info every object of a view call starts from.
    fn default_cache_info(&self, _context: &Context, config: &RenderCacheConfig) -> CacheInfo {
        base_default_cache_info(config)
    }

    /// Whether this view call may use the cache at all.
    fn is_cacheable(&self, default: &CacheInfo, context: &Context, renderer: &Renderer<'_>) -> bool {
        base_is_cacheable(self.kind(), default, context, renderer)
    }

    /// Build render nodes for objects that were not served from cache.
    fn render(
        &self,
        objects: &Objects<Self::Object>,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Build, AppError>;

    /// Render objects one at a time inside their own recursion frame, so
    /// each node carries exactly the metadata collected while it rendered.
    fn render_recursive(
        &self,
        objects: &Objects<Self::Object>,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Build, AppError> {
        let mut build = Vec::with_capacity(objects.len());
        for (id, object) in objects {
            let single = [(id.clone(), object.clone())];
            renderer.stack_mut().increase_recursion();
            let result = self.render(&single, context, renderer);
            let storage = renderer.stack_mut().decrease_recursion();

            let rendered = result?;
            if let Some((_, mut node)) = rendered.into_iter().find(|(rendered_id, _)| rendered_id == id) {
                if !node.is_empty() {
                    if !storage.is_empty() {
                        node.carry(storage);
                    }
                    build.push((id.clone(), node));
                }
            }
        }
        Ok(build)
    }

    fn view(
        &self,
        objects: &Objects<Self::Object>,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Build, AppError> {
        view_objects(self, objects, context, renderer, ViewOptions::default())
    }

    /// View objects in place of their placeholders.
    fn view_placeholders(
        &self,
        objects: &Objects<Self::Object>,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Build, AppError> {
        let options = ViewOptions {
            pass: ResolvePass::Placeholder,
            ..ViewOptions::default()
        };
        view_objects(self, objects, context, renderer, options)
    }
}

/// Type-erased entry point used to render deferred objects by kind.
pub trait PlaceholderView: Send + Sync {
    fn view_placeholder(
        &self,
        id: &str,
        object: &Value,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Option<RenderNode>, AppError>;
}

impl<C: Controller> PlaceholderView for C {
    fn view_placeholder(
        &self,
        id: &str,
        object: &Value,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Option<RenderNode>, AppError> {
        let object: C::Object = serde_json::from_value(object.clone())?;
        let objects = [(id.to_string(), object)];
        let mut build = self.view_placeholders(&objects, context, renderer)?;
        Ok(build.pop().map(|(_, node)| node))
    }
}

#[derive(Debug, Default)]
pub struct ViewOptions {
    pub pass: ResolvePass,
    /// Storage collected before the view started; attached to the first
    /// freshly rendered object.
    pub inherited: Option<RecursionStorage>,
}

pub fn base_default_cache_info(config: &RenderCacheConfig) -> CacheInfo {
    let mut info = CacheInfo::new(config.default_bin.clone());
    info.granularity = Some(Granularity::PER_ROLE);
    info
}

pub fn base_is_cacheable(
    kind: &str,
    default: &CacheInfo,
    _context: &Context,
    renderer: &Renderer<'_>,
) -> bool {
    let request = renderer.request();
    default.granularity.is_some()
        && renderer.config().kind_enabled(kind)
        && !request.no_cache
        && (default.ignore_request_method_check || request.is_safe_method())
}

/// The view pipeline shared by every controller.
#[instrument(skip_all, fields(kind = controller.kind(), objects = objects.len()))]
pub fn view_objects<C>(
    controller: &C,
    objects: &Objects<C::Object>,
    context: &Context,
    renderer: &mut Renderer<'_>,
    options: ViewOptions,
) -> Result<Build, AppError>
where
    C: Controller + ?Sized,
{
    let started = Instant::now();
    let kind = controller.kind().to_string();
    let service = renderer.service();
    let config = renderer.config();

    let mut default = controller.default_cache_info(context, config);
    service
        .alters()
        .alter_default_cache_info(&kind, &mut default, context);

    let cacheable = controller.is_cacheable(&default, context, renderer);

    let mut infos: Vec<(String, CacheInfo)> = Vec::with_capacity(objects.len());
    {
        let env = ResolveEnv {
            alters: service.alters(),
            request: renderer.request(),
            algorithm: config.hash_algorithm,
            pass: options.pass,
        };
        for (id, object) in objects {
            let object_context = context.clone().with("id", id.clone());
            let (mut info, _) = resolve_cache_info(controller, object, object_context, &default, &env)?;
            if !cacheable {
                info.cid = None;
            }
            infos.push((id.clone(), info));
        }
    }

    let mut build = service.adapter().get_multiple(&infos)?;
    let hits = build.len();

    for ((id, info), (_, object)) in infos.iter().zip(objects) {
        if info.placeholder_id.is_none() || build.contains_key(id) {
            continue;
        }
        let placeholder = PlaceholderObject {
            kind: kind.clone(),
            id: id.clone(),
            object: serde_json::to_value(object)?,
            context: context.clone(),
            cache_info: info.clone(),
        };
        let args = vec![("object".to_string(), serde_json::to_value(&placeholder)?)];
        build.insert(id.clone(), get_placeholder(RENDER_PLACEHOLDERS_FUNCTION, args, true));
    }

    let remaining: Vec<(String, C::Object)> = objects
        .iter()
        .filter(|(id, _)| !build.contains_key(id))
        .cloned()
        .collect();

    let info_map: HashMap<String, CacheInfo> = infos.iter().cloned().collect();

    if !remaining.is_empty() {
        let mut rendered = controller.render_recursive(&remaining, context, renderer)?;
        if let Some(inherited) = options.inherited
            && let Some((_, first)) = rendered.first_mut()
        {
            first.carry(inherited);
        }
        let markup = Arc::clone(service.markup_renderer());
        let stored = service.adapter().set_multiple(
            rendered,
            &info_map,
            renderer.stack_mut(),
            markup.as_ref(),
        )?;
        build.extend(stored);
    }

    let mut output = Vec::with_capacity(objects.len());
    let mut header_tags = CacheTags::new();
    for (id, _) in objects {
        let Some(mut node) = build.remove(id) else {
            continue;
        };
        node.weight = 0;

        let storage = renderer.stack_mut().add_recursion_storage(&mut node, false);
        let info = &info_map[id];
        if !renderer.stack().is_recursive() {
            node.absorb(storage);
            renderer.process_post_render_cache(&mut node, info)?;
            header_tags.merge(&node.cache.tags);
        }

        if info.debug_output || config.debug_output_for(&kind) {
            wrap_debug_output(&mut node, id, info, &service.alters().describe(&kind), &kind);
        }

        output.push((id.clone(), node));
    }

    if !renderer.stack().is_recursive() && config.send_cache_tags {
        header_tags.merge(&renderer.stack().recursion_storage().cache.tags);
        if !header_tags.is_empty() {
            renderer.set_cache_tags_header(header_tags.to_header_value());
        }
    }

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    histogram!("render_cache_view_ms", "kind" => kind.clone()).record(elapsed_ms);
    debug!(
        kind = %kind,
        objects = objects.len(),
        hits,
        rendered = remaining.len(),
        elapsed_ms,
        "Viewed objects"
    );

    Ok(output)
}

fn wrap_debug_output(node: &mut RenderNode, id: &str, info: &CacheInfo, listeners: &[String], kind: &str) {
    let Some(markup) = node.markup.as_ref() else {
        return;
    };
    let dump = serde_json::to_string_pretty(info).unwrap_or_default();
    let mut prefix = format!("<!-- START RENDER ID: {id} CACHE INFO: \n{dump}\nHOOKS:\n");
    for event in AlterEvent::ALL {
        let _ = writeln!(prefix, "* {kind}.{}", event.as_str());
    }
    for listener in listeners {
        let _ = writeln!(prefix, "  - {listener}");
    }
    prefix.push_str("-->");
    node.markup = Some(format!("\n{prefix}\n{markup}\n<!-- END RENDER -->\n"));
}
