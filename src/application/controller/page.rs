//! Render caching for whole pages.
//!
//! Page caching is opt-in per page callback. Everything rendered between
//! [`PageController::begin_request`] and the page view (blocks, entities,
//! their deferred callbacks) is collected in a dedicated frame and handed to
//! the page, so a cached page replays it.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::cache::config::RenderCacheConfig;
use crate::cache::info::{CacheHash, CacheInfo, RenderToMarkup};
use crate::cache::resolver::{CacheInfoProvider, base_cache_keys, base_cache_tags};
use crate::domain::context::Context;
use crate::domain::entities::PageRecord;
use crate::domain::error::DomainError;
use crate::domain::render::RenderNode;
use crate::domain::tags::CacheTags;
use crate::domain::types::Granularity;

use super::{Build, Controller, Objects, ViewOptions, base_default_cache_info, base_is_cacheable, view_objects};
use crate::application::error::AppError;
use crate::application::service::Renderer;

pub const PAGE_KIND: &str = "page";

const EXPIRATION_BUCKET_SECS: f64 = 3600.0;

/// Host page assembly: wraps the main content in the page template.
pub trait PageBuilder: Send + Sync {
    fn build_page(
        &self,
        page: &PageRecord,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<RenderNode, AppError>;
}

pub struct PageController {
    builder: Arc<dyn PageBuilder>,
}

impl PageController {
    pub fn new(builder: Arc<dyn PageBuilder>) -> Self {
        Self { builder }
    }

    /// Start collecting page-level storage. Call before any content of the
    /// page is rendered; a second call is a no-op.
    pub fn begin_request(&self, renderer: &mut Renderer<'_>) {
        renderer.open_page_frame();
    }
}

impl CacheInfoProvider for PageController {
    type Object = PageRecord;

    fn kind(&self) -> &str {
        PAGE_KIND
    }

    fn cache_context(&self, page: &PageRecord, mut context: Context) -> Result<Context, DomainError> {
        context.insert_default("page_callback", page.callback.clone());
        Ok(context)
    }

    fn cache_keys(&self, _page: &PageRecord, context: &Context) -> Result<Vec<String>, DomainError> {
        let mut keys = base_cache_keys(self.kind());
        keys.push(context.require("page_callback")?);
        Ok(keys)
    }

    fn cache_hash(&self, _page: &PageRecord, _context: &Context) -> Result<CacheHash, DomainError> {
        Ok(CacheHash::new().with("expiration", expiration_bucket(OffsetDateTime::now_utc())))
    }

    fn cache_tags(&self, _page: &PageRecord, _context: &Context) -> Result<CacheTags, DomainError> {
        Ok(base_cache_tags(self.kind()).flag("theme_global_settings"))
    }
}

impl Controller for PageController {
    fn default_cache_info(&self, _context: &Context, config: &RenderCacheConfig) -> CacheInfo {
        let mut info = base_default_cache_info(config);
        info.granularity = Some(Granularity::PER_ROLE | Granularity::PER_PAGE);
        info.render_to_markup = RenderToMarkup::Enabled;
        info
    }

    fn is_cacheable(&self, default: &CacheInfo, context: &Context, renderer: &Renderer<'_>) -> bool {
        context
            .get_string("page_callback")
            .is_some_and(|callback| renderer.config().page_enabled(&callback))
            && base_is_cacheable(self.kind(), default, context, renderer)
    }

    fn render(
        &self,
        pages: &Objects<PageRecord>,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Build, AppError> {
        let mut build = Vec::with_capacity(pages.len());
        for (id, page) in pages {
            let node = self.builder.build_page(page, context, renderer)?;
            build.push((id.clone(), node));
        }
        // The theme is only known once the page is assembled.
        let theme = renderer.request().theme.clone();
        if let Some((_, first)) = build.first_mut() {
            first.cache.tags.insert("theme", theme);
        }
        Ok(build)
    }

    fn view(
        &self,
        pages: &Objects<PageRecord>,
        context: &Context,
        renderer: &mut Renderer<'_>,
    ) -> Result<Build, AppError> {
        let inherited = renderer.close_page_frame();

        let mut context = context.clone();
        if let Some((_, page)) = pages.first() {
            context.insert_default("page_callback", page.callback.clone());
        }

        let options = ViewOptions {
            inherited,
            ..ViewOptions::default()
        };
        view_objects(self, pages, &context, renderer, options)
    }
}

/// Hour bucket of `now`; entries roll over roughly every hour.
fn expiration_bucket(now: OffsetDateTime) -> i64 {
    (now.unix_timestamp() as f64 / EXPIRATION_BUCKET_SECS).round() as i64
}
