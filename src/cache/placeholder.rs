//! Placeholder generation.
//!
//! A placeholder is a deterministic token left in markup together with a
//! post-render callback that later swaps the token for fresh content. Content
//! that is too dynamic to cache (a user name, a CSRF token) can then live
//! inside an otherwise cached fragment.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::domain::error::DomainError;
use crate::domain::render::{PlaceholderArgs, PlaceholderContext, RenderNode};

use super::keys::HashAlgorithm;

/// Post-render callback resolving one placeholder per context.
pub const PLACEHOLDER_CALLBACK: &str = "render_cache.placeholder";
/// Post-render callback resolving a whole group of placeholders in one call.
pub const PLACEHOLDER_MULTI_CALLBACK: &str = "render_cache.placeholder_multi";

/// Argument names starting with this marker are loaded before the call: the
/// rest of the name selects the loader and the value is its input.
pub const LOADER_MARKER: char = '%';

/// Deterministic token for a function and its arguments.
pub fn placeholder_token(function: &str, args: &PlaceholderArgs) -> String {
    let encoded = serde_json::to_string(args).unwrap_or_default();
    HashAlgorithm::Sha256.digest(&format!("{function}:{encoded}"))
}

/// Markup the token is embedded as.
pub fn placeholder_markup(context: &PlaceholderContext) -> String {
    format!(
        "<render-cache-placeholder callback=\"{}\" token=\"{}\"></render-cache-placeholder>",
        context.function, context.token
    )
}

/// Build the render node for a placeholder.
///
/// With `multiple` set the placeholder joins a group keyed by the function
/// name, resolved by a single call covering every placeholder of the group.
pub fn get_placeholder(function: &str, args: PlaceholderArgs, multiple: bool) -> RenderNode {
    let token = placeholder_token(function, &args);
    let context = PlaceholderContext {
        function: function.to_string(),
        args,
        token,
    };
    let mut node = RenderNode::markup(placeholder_markup(&context));
    if multiple {
        node.post_render_cache.push(
            PLACEHOLDER_MULTI_CALLBACK,
            Some(function.to_string()),
            context,
        );
    } else {
        node.post_render_cache
            .push(PLACEHOLDER_CALLBACK, None, context);
    }
    node
}

/// Turns a loader token value into the argument handed to the function,
/// e.g. an entity id into the entity.
pub trait ArgLoader: Send + Sync {
    fn load(&self, value: &Value) -> Result<Value, DomainError>;
}

#[derive(Default)]
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn ArgLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, loader: Arc<dyn ArgLoader>) {
        self.loaders.insert(name.into(), loader);
    }

    /// Positional argument values with loader tokens resolved.
    ///
    /// A token naming no registered loader passes its value through unchanged.
    pub fn resolve_args(&self, args: &PlaceholderArgs) -> Result<Vec<Value>, DomainError> {
        args.iter()
            .map(|(name, value)| {
                let Some(loader) = name.strip_prefix(LOADER_MARKER) else {
                    return Ok(value.clone());
                };
                match self.loaders.get(loader) {
                    Some(registered) => registered.load(value),
                    None => {
                        warn!(loader, "No argument loader registered; passing value through");
                        Ok(value.clone())
                    }
                }
            })
            .collect()
    }
}
