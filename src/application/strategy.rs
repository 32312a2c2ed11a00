//! Render strategies for deferred controller objects.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

use crate::cache::info::CacheInfo;
use crate::domain::context::Context;
use crate::domain::render::RenderNode;

use super::error::AppError;
use super::service::{DeferredPlaceholder, Renderer};

pub const DIRECT_STRATEGY: &str = "direct";
pub const BIG_PIPE_STRATEGY: &str = "big_pipe";
pub const ESI_VALIDATE_STRATEGY: &str = "esi_validate";

/// Path the ESI include points at; the host serves cached entries there.
pub const ESI_VALIDATE_PATH: &str = "/render-cache/esi-validate-render";

/// A controller object deferred behind a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderObject {
    pub kind: String,
    pub id: String,
    pub object: Value,
    /// Context of the view call that deferred the object.
    pub context: Context,
    pub cache_info: CacheInfo,
}

impl PlaceholderObject {
    pub fn from_value(value: &Value) -> Result<Self, AppError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Strategy names to try, in order; always ends with `direct`.
    pub fn strategies(&self) -> Vec<String> {
        let mut strategies = self.cache_info.render_strategy.clone();
        if !strategies.iter().any(|name| name == DIRECT_STRATEGY) {
            strategies.push(DIRECT_STRATEGY.to_string());
        }
        strategies
    }
}

/// Turns deferred objects into content.
///
/// Returns output keyed by placeholder markup; objects left out fall through
/// to the next strategy.
pub trait RenderStrategy: Send + Sync {
    fn render(
        &self,
        placeholders: &[(String, PlaceholderObject)],
        renderer: &mut Renderer<'_>,
    ) -> Result<HashMap<String, RenderNode>, AppError>;
}

/// Renders the objects in place through their controllers.
pub struct DirectStrategy;

impl RenderStrategy for DirectStrategy {
    fn render(
        &self,
        placeholders: &[(String, PlaceholderObject)],
        renderer: &mut Renderer<'_>,
    ) -> Result<HashMap<String, RenderNode>, AppError> {
        let mut output = HashMap::with_capacity(placeholders.len());
        for (markup, placeholder) in placeholders {
            let controller = renderer.service().controller(&placeholder.kind)?;
            let node = controller
                .view_placeholder(&placeholder.id, &placeholder.object, &placeholder.context, renderer)?
                .unwrap_or_default();
            output.insert(markup.clone(), node);
        }
        Ok(output)
    }
}

/// Leaves the placeholder in the markup and records it so the host can
/// stream the content after the main response.
pub struct BigPipeStrategy;

impl RenderStrategy for BigPipeStrategy {
    fn render(
        &self,
        placeholders: &[(String, PlaceholderObject)],
        renderer: &mut Renderer<'_>,
    ) -> Result<HashMap<String, RenderNode>, AppError> {
        let mut output = HashMap::with_capacity(placeholders.len());
        for (markup, placeholder) in placeholders {
            renderer.defer_placeholder(DeferredPlaceholder {
                markup: markup.clone(),
                object: placeholder.clone(),
            });
            output.insert(markup.clone(), RenderNode::markup(markup.clone()));
        }
        debug!(deferred = placeholders.len(), "Deferred placeholders for streaming");
        Ok(output)
    }
}

/// Emits an ESI include when the edge advertised ESI validation support.
///
/// Objects without a cache id cannot be validated and fall through.
pub struct EsiValidateStrategy;

impl RenderStrategy for EsiValidateStrategy {
    fn render(
        &self,
        placeholders: &[(String, PlaceholderObject)],
        renderer: &mut Renderer<'_>,
    ) -> Result<HashMap<String, RenderNode>, AppError> {
        if !renderer.request().esi_validate {
            return Ok(HashMap::new());
        }

        let mut output = HashMap::new();
        for (markup, placeholder) in placeholders {
            let info = &placeholder.cache_info;
            let Some(cid) = info.cid.as_deref().or(info.placeholder_id.as_deref()) else {
                continue;
            };
            output.insert(markup.clone(), RenderNode::markup(esi_include(cid, &info.bin)));
        }
        Ok(output)
    }
}

/// `<esi:include>` tag pointing at the validation endpoint for an entry.
pub fn esi_include(cid: &str, bin: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("cid", cid)
        .append_pair("bin", bin)
        .finish();
    format!("<esi:include src=\"{ESI_VALIDATE_PATH}?{query}\" />")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_always_end_with_direct() {
        let mut info = CacheInfo::new("cache_render");
        info.render_strategy = vec![ESI_VALIDATE_STRATEGY.to_string()];
        let object = PlaceholderObject {
            kind: "block".to_string(),
            id: "1".to_string(),
            object: Value::Null,
            context: Context::new(),
            cache_info: info,
        };
        assert_eq!(object.strategies(), [ESI_VALIDATE_STRATEGY, DIRECT_STRATEGY]);
    }

    #[test]
    fn esi_include_encodes_query() {
        assert_eq!(
            esi_include("render_cache:block:a b", "cache_render"),
            "<esi:include src=\"/render-cache/esi-validate-render?cid=render_cache%3Ablock%3Aa+b&bin=cache_render\" />"
        );
    }
}
