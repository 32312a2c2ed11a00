//! Shared render cache service and the request-scoped renderer.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, trace};

use crate::cache::adapter::BackendAdapter;
use crate::cache::config::RenderCacheConfig;
use crate::cache::hooks::{AlterRegistry, CacheInfoAlter};
use crate::cache::info::CacheInfo;
use crate::cache::placeholder::{ArgLoader, LoaderRegistry, PLACEHOLDER_CALLBACK, PLACEHOLDER_MULTI_CALLBACK};
use crate::cache::stack::{MarkupRenderer, RenderStack};
use crate::cache::store::CacheStore;
use crate::cache::validate::ValidationStrategy;
use crate::domain::render::{PostRenderCache, RecursionStorage, RenderNode};
use crate::domain::request::RequestInfo;
use crate::domain::types::CacheStrategy;
use crate::infra::markup::TreeMarkupRenderer;

use super::controller::{Controller, PlaceholderView};
use super::error::AppError;
use super::placeholder::{
    ControllerPlaceholders, MultiPlaceholderCallback, PlaceholderFunction, PostRenderCallback,
    RENDER_PLACEHOLDERS_FUNCTION, SinglePlaceholderCallback,
};
use super::strategy::{
    BIG_PIPE_STRATEGY, BigPipeStrategy, DIRECT_STRATEGY, DirectStrategy, ESI_VALIDATE_STRATEGY,
    EsiValidateStrategy, PlaceholderObject, RenderStrategy,
};

/// Response header carrying the aggregated cache tags.
pub const CACHE_TAGS_HEADER: &str = "X-Cache-Tags";

/// Long-lived render cache state shared by every request.
pub struct RenderCacheService {
    config: RenderCacheConfig,
    adapter: BackendAdapter,
    alters: AlterRegistry,
    loaders: LoaderRegistry,
    callbacks: HashMap<String, Arc<dyn PostRenderCallback>>,
    functions: HashMap<String, Arc<dyn PlaceholderFunction>>,
    strategies: HashMap<String, Arc<dyn RenderStrategy>>,
    controllers: HashMap<String, Arc<dyn PlaceholderView>>,
    markup: Arc<dyn MarkupRenderer>,
}

impl RenderCacheService {
    pub fn builder(config: RenderCacheConfig, store: Arc<dyn CacheStore>) -> RenderCacheServiceBuilder {
        RenderCacheServiceBuilder::new(config, store)
    }

    pub fn config(&self) -> &RenderCacheConfig {
        &self.config
    }

    pub fn adapter(&self) -> &BackendAdapter {
        &self.adapter
    }

    pub fn alters(&self) -> &AlterRegistry {
        &self.alters
    }

    pub fn loaders(&self) -> &LoaderRegistry {
        &self.loaders
    }

    pub fn markup_renderer(&self) -> &Arc<dyn MarkupRenderer> {
        &self.markup
    }

    pub fn callback(&self, name: &str) -> Result<Arc<dyn PostRenderCallback>, AppError> {
        self.callbacks
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownCallback(name.to_string()))
    }

    pub fn placeholder_function(&self, name: &str) -> Result<Arc<dyn PlaceholderFunction>, AppError> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownPlaceholderFunction(name.to_string()))
    }

    pub fn strategy(&self, name: &str) -> Result<Arc<dyn RenderStrategy>, AppError> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownStrategy(name.to_string()))
    }

    pub fn controller(&self, kind: &str) -> Result<Arc<dyn PlaceholderView>, AppError> {
        self.controllers
            .get(kind)
            .cloned()
            .ok_or_else(|| AppError::UnknownController(kind.to_string()))
    }

    /// Start a request.
    pub fn begin_request(&self, request: RequestInfo) -> RequestScope {
        RequestScope::new(request)
    }

    /// Renderer bound to one request.
    pub fn renderer<'a>(&'a self, scope: &'a mut RequestScope) -> Renderer<'a> {
        Renderer {
            service: self,
            scope,
        }
    }
}

pub struct RenderCacheServiceBuilder {
    config: RenderCacheConfig,
    store: Arc<dyn CacheStore>,
    validator: Option<Arc<dyn ValidationStrategy>>,
    alters: AlterRegistry,
    loaders: LoaderRegistry,
    callbacks: HashMap<String, Arc<dyn PostRenderCallback>>,
    functions: HashMap<String, Arc<dyn PlaceholderFunction>>,
    strategies: HashMap<String, Arc<dyn RenderStrategy>>,
    controllers: HashMap<String, Arc<dyn PlaceholderView>>,
    markup: Arc<dyn MarkupRenderer>,
}

impl RenderCacheServiceBuilder {
    fn new(config: RenderCacheConfig, store: Arc<dyn CacheStore>) -> Self {
        let mut callbacks: HashMap<String, Arc<dyn PostRenderCallback>> = HashMap::new();
        callbacks.insert(PLACEHOLDER_CALLBACK.to_string(), Arc::new(SinglePlaceholderCallback));
        callbacks.insert(
            PLACEHOLDER_MULTI_CALLBACK.to_string(),
            Arc::new(MultiPlaceholderCallback),
        );

        let mut functions: HashMap<String, Arc<dyn PlaceholderFunction>> = HashMap::new();
        functions.insert(
            RENDER_PLACEHOLDERS_FUNCTION.to_string(),
            Arc::new(ControllerPlaceholders),
        );

        let mut strategies: HashMap<String, Arc<dyn RenderStrategy>> = HashMap::new();
        strategies.insert(DIRECT_STRATEGY.to_string(), Arc::new(DirectStrategy));
        strategies.insert(BIG_PIPE_STRATEGY.to_string(), Arc::new(BigPipeStrategy));
        strategies.insert(ESI_VALIDATE_STRATEGY.to_string(), Arc::new(EsiValidateStrategy));

        let markup: Arc<dyn MarkupRenderer> =
            Arc::new(TreeMarkupRenderer::with_store(Arc::clone(&store)));

        Self {
            config,
            store,
            validator: None,
            alters: AlterRegistry::new(),
            loaders: LoaderRegistry::new(),
            callbacks,
            functions,
            strategies,
            controllers: HashMap::new(),
            markup,
        }
    }

    pub fn markup_renderer(mut self, markup: Arc<dyn MarkupRenderer>) -> Self {
        self.markup = markup;
        self
    }

    pub fn validator(mut self, validator: Arc<dyn ValidationStrategy>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn alter(mut self, kind: impl Into<String>, listener: Arc<dyn CacheInfoAlter>) -> Self {
        self.alters.register(kind, listener);
        self
    }

    pub fn alter_with_priority(
        mut self,
        kind: impl Into<String>,
        priority: i32,
        listener: Arc<dyn CacheInfoAlter>,
    ) -> Self {
        self.alters.register_with_priority(kind, priority, listener);
        self
    }

    pub fn loader(mut self, name: impl Into<String>, loader: Arc<dyn ArgLoader>) -> Self {
        self.loaders.register(name, loader);
        self
    }

    pub fn callback(mut self, name: impl Into<String>, callback: Arc<dyn PostRenderCallback>) -> Self {
        self.callbacks.insert(name.into(), callback);
        self
    }

    pub fn placeholder_function(
        mut self,
        name: impl Into<String>,
        function: Arc<dyn PlaceholderFunction>,
    ) -> Self {
        self.functions.insert(name.into(), function);
        self
    }

    pub fn strategy(mut self, name: impl Into<String>, strategy: Arc<dyn RenderStrategy>) -> Self {
        self.strategies.insert(name.into(), strategy);
        self
    }

    /// Register a controller so placeholders of its kind can be rendered.
    pub fn controller<C>(mut self, controller: Arc<C>) -> Self
    where
        C: Controller + 'static,
    {
        let kind = controller.kind().to_string();
        self.controllers.insert(kind, controller);
        self
    }

    pub fn build(self) -> RenderCacheService {
        let mut adapter = BackendAdapter::new(self.store);
        if let Some(validator) = self.validator {
            adapter = adapter.with_validator(validator);
        }
        RenderCacheService {
            config: self.config,
            adapter,
            alters: self.alters,
            loaders: self.loaders,
            callbacks: self.callbacks,
            functions: self.functions,
            strategies: self.strategies,
            controllers: self.controllers,
            markup: self.markup,
        }
    }
}

/// A placeholder left in the output for the host to stream later.
#[derive(Debug, Clone)]
pub struct DeferredPlaceholder {
    /// Markup the placeholder occupies in the response.
    pub markup: String,
    pub object: PlaceholderObject,
}

/// Per-request render state.
#[derive(Debug)]
pub struct RequestScope {
    request: RequestInfo,
    pub(crate) stack: RenderStack,
    cache_tags_header: Option<String>,
    deferred: Vec<DeferredPlaceholder>,
    page_frame_open: bool,
}

impl RequestScope {
    pub fn new(request: RequestInfo) -> Self {
        Self {
            request,
            stack: RenderStack::new(),
            cache_tags_header: None,
            deferred: Vec::new(),
            page_frame_open: false,
        }
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn stack(&self) -> &RenderStack {
        &self.stack
    }

    /// Value of the cache-tags header, if any top-level render produced tags.
    pub fn cache_tags_header(&self) -> Option<(&'static str, &str)> {
        self.cache_tags_header
            .as_deref()
            .map(|value| (CACHE_TAGS_HEADER, value))
    }

    pub fn deferred_placeholders(&self) -> &[DeferredPlaceholder] {
        &self.deferred
    }

    pub fn take_deferred_placeholders(&mut self) -> Vec<DeferredPlaceholder> {
        std::mem::take(&mut self.deferred)
    }
}

/// Renderer bound to the shared service and one request.
pub struct Renderer<'a> {
    service: &'a RenderCacheService,
    scope: &'a mut RequestScope,
}

impl<'a> Renderer<'a> {
    pub fn service(&self) -> &'a RenderCacheService {
        self.service
    }

    pub fn config(&self) -> &'a RenderCacheConfig {
        &self.service.config
    }

    pub fn request(&self) -> &RequestInfo {
        &self.scope.request
    }

    pub fn stack(&self) -> &RenderStack {
        &self.scope.stack
    }

    pub fn stack_mut(&mut self) -> &mut RenderStack {
        &mut self.scope.stack
    }

    /// Render a node with the host evaluator.
    ///
    /// Metadata the render collects is recorded in the current frame, so it
    /// reaches whatever is being rendered around this node.
    pub fn render_markup(&mut self, node: &mut RenderNode) -> Result<String, AppError> {
        let markup = Arc::clone(&self.service.markup);
        let (output, storage) = self
            .scope
            .stack
            .render_markup(node, |_, node| markup.render(node))?;
        self.scope.stack.push_storage(storage);
        Ok(output)
    }

    /// Replace the cache-tags header. Later top-level renders overwrite
    /// earlier ones.
    pub fn set_cache_tags_header(&mut self, value: String) {
        trace!(header = CACHE_TAGS_HEADER, value = %value, "Set cache tags header");
        self.scope.cache_tags_header = Some(value);
    }

    pub fn defer_placeholder(&mut self, placeholder: DeferredPlaceholder) {
        self.scope.deferred.push(placeholder);
    }

    pub(crate) fn open_page_frame(&mut self) {
        if !self.scope.page_frame_open {
            self.scope.stack.increase_recursion();
            self.scope.page_frame_open = true;
        }
    }

    /// Close the frame opened by [`Renderer::open_page_frame`], returning
    /// what was collected while the page content was built.
    pub(crate) fn close_page_frame(&mut self) -> Option<RecursionStorage> {
        if !self.scope.page_frame_open {
            return None;
        }
        self.scope.page_frame_open = false;
        Some(self.scope.stack.decrease_recursion())
    }

    /// Run deferred post-render callbacks on a top-level, directly rendered
    /// node until none remain.
    ///
    /// Every round runs in its own frame so callbacks registered by the
    /// content they produce are picked up by the next round. Assets collected
    /// along the way are merged into the node.
    pub fn process_post_render_cache(
        &mut self,
        node: &mut RenderNode,
        info: &CacheInfo,
    ) -> Result<(), AppError> {
        if info.strategy() != CacheStrategy::DirectRender {
            return Ok(());
        }

        let mut storage = node.take_metadata();
        let mut rounds = 0usize;
        while !storage.post_render_cache.is_empty() {
            rounds += 1;
            let callbacks = std::mem::take(&mut storage.post_render_cache);

            self.scope.stack.increase_recursion();
            self.scope.stack.push_storage(storage);
            let result = self.run_callbacks(node, callbacks);
            if result.is_ok() {
                self.scope.stack.add_recursion_storage(node, false);
            }
            storage = self.scope.stack.decrease_recursion();
            result?;

            if !storage.attached.is_empty() {
                node.attached
                    .merge(&std::mem::take(&mut storage.attached));
            }
        }

        if rounds > 0 {
            debug!(rounds, "Processed post-render callbacks");
        }
        node.absorb(storage);
        Ok(())
    }

    fn run_callbacks(&mut self, node: &mut RenderNode, callbacks: PostRenderCache) -> Result<(), AppError> {
        for entry in callbacks.into_entries() {
            let callback = self.service.callback(&entry.callback)?;
            if entry.group.is_some() {
                callback.call(node, &entry.contexts, self)?;
            } else {
                for context in &entry.contexts {
                    callback.call(node, std::slice::from_ref(context), self)?;
                }
            }
            counter!("render_cache_placeholder_total", "callback" => entry.callback.clone())
                .increment(entry.contexts.len() as u64);
        }
        Ok(())
    }
}
