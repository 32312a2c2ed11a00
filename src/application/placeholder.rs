//! Placeholder resolution.
//!
//! Post-render callbacks swap placeholder tokens left in rendered markup for
//! freshly built content, either one token at a time or one group per call.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{trace, warn};

use crate::cache::placeholder::placeholder_markup;
use crate::domain::render::{PlaceholderArgs, PlaceholderContext, RenderNode};

use super::error::AppError;
use super::service::Renderer;
use super::strategy::{DIRECT_STRATEGY, PlaceholderObject};

/// Placeholder function rendering deferred controller objects through their
/// render strategies.
pub const RENDER_PLACEHOLDERS_FUNCTION: &str = "render_cache.render_placeholders";

/// A deferred callback run on a rendered element.
pub trait PostRenderCallback: Send + Sync {
    fn call(
        &self,
        element: &mut RenderNode,
        contexts: &[PlaceholderContext],
        renderer: &mut Renderer<'_>,
    ) -> Result<(), AppError>;
}

/// Produces the content a placeholder stands for.
pub trait PlaceholderFunction: Send + Sync {
    /// Content for one placeholder; loader arguments are already resolved.
    fn render(&self, args: &[Value], renderer: &mut Renderer<'_>) -> Result<RenderNode, AppError>;

    /// Content for a group of placeholders, keyed by placeholder markup.
    ///
    /// Arguments arrive unresolved so an implementation can load them in one
    /// batch. The default resolves and renders each placeholder on its own.
    fn render_multiple(
        &self,
        placeholders: &[(String, PlaceholderArgs)],
        renderer: &mut Renderer<'_>,
    ) -> Result<Vec<(String, RenderNode)>, AppError> {
        let mut rendered = Vec::with_capacity(placeholders.len());
        for (markup, args) in placeholders {
            let values = renderer.service().loaders().resolve_args(args)?;
            rendered.push((markup.clone(), self.render(&values, renderer)?));
        }
        Ok(rendered)
    }
}

/// Adapts a closure into a [`PlaceholderFunction`].
pub struct FnPlaceholder<F>(pub F);

impl<F> PlaceholderFunction for FnPlaceholder<F>
where
    F: Fn(&[Value]) -> RenderNode + Send + Sync,
{
    fn render(&self, args: &[Value], _renderer: &mut Renderer<'_>) -> Result<RenderNode, AppError> {
        Ok((self.0)(args))
    }
}

fn contains(element: &RenderNode, needle: &str) -> bool {
    element
        .markup
        .as_deref()
        .is_some_and(|markup| markup.contains(needle))
}

fn replace(element: &mut RenderNode, needle: &str, content: &str) {
    if let Some(markup) = element.markup.as_mut() {
        *markup = markup.replace(needle, content);
    }
}

/// Resolves placeholders one context at a time.
pub struct SinglePlaceholderCallback;

impl PostRenderCallback for SinglePlaceholderCallback {
    fn call(
        &self,
        element: &mut RenderNode,
        contexts: &[PlaceholderContext],
        renderer: &mut Renderer<'_>,
    ) -> Result<(), AppError> {
        for context in contexts {
            let placeholder = placeholder_markup(context);
            if !contains(element, &placeholder) {
                trace!(function = %context.function, token = %context.token, "Placeholder not in markup");
                continue;
            }

            let function = renderer.service().placeholder_function(&context.function)?;
            let args = renderer.service().loaders().resolve_args(&context.args)?;
            let mut content = function.render(&args, renderer)?;
            let rendered = renderer.render_markup(&mut content)?;
            replace(element, &placeholder, &rendered);
        }
        Ok(())
    }
}

/// Resolves a group of placeholders sharing one function in a single call.
pub struct MultiPlaceholderCallback;

impl PostRenderCallback for MultiPlaceholderCallback {
    fn call(
        &self,
        element: &mut RenderNode,
        contexts: &[PlaceholderContext],
        renderer: &mut Renderer<'_>,
    ) -> Result<(), AppError> {
        let Some(first) = contexts.first() else {
            return Ok(());
        };

        let pending: Vec<(String, PlaceholderArgs)> = contexts
            .iter()
            .map(|context| (placeholder_markup(context), context.args.clone()))
            .filter(|(placeholder, _)| contains(element, placeholder))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let function = renderer.service().placeholder_function(&first.function)?;
        for (placeholder, mut content) in function.render_multiple(&pending, renderer)? {
            let rendered = renderer.render_markup(&mut content)?;
            replace(element, &placeholder, &rendered);
        }
        Ok(())
    }
}

/// Renders deferred controller objects.
///
/// Each object tries its render strategies in order, `direct` last; the
/// first strategy producing output for it wins. Objects sharing a strategy
/// are handed to it in one batch.
pub struct ControllerPlaceholders;

impl PlaceholderFunction for ControllerPlaceholders {
    fn render(&self, args: &[Value], renderer: &mut Renderer<'_>) -> Result<RenderNode, AppError> {
        let Some(value) = args.first() else {
            return Ok(RenderNode::new());
        };
        let object = PlaceholderObject::from_value(value)?;
        let mut rendered = self.render_objects(vec![(String::new(), object)], renderer)?;
        Ok(rendered.pop().map(|(_, node)| node).unwrap_or_default())
    }

    fn render_multiple(
        &self,
        placeholders: &[(String, PlaceholderArgs)],
        renderer: &mut Renderer<'_>,
    ) -> Result<Vec<(String, RenderNode)>, AppError> {
        let mut objects = Vec::with_capacity(placeholders.len());
        for (markup, args) in placeholders {
            if let Some((_, value)) = args.iter().find(|(name, _)| name == "object") {
                objects.push((markup.clone(), PlaceholderObject::from_value(value)?));
            }
        }
        self.render_objects(objects, renderer)
    }
}

impl ControllerPlaceholders {
    fn render_objects(
        &self,
        objects: Vec<(String, PlaceholderObject)>,
        renderer: &mut Renderer<'_>,
    ) -> Result<Vec<(String, RenderNode)>, AppError> {
        let mut output = Vec::with_capacity(objects.len());
        let mut pending: Vec<(String, PlaceholderObject, usize)> = objects
            .into_iter()
            .map(|(markup, object)| (markup, object, 0))
            .collect();

        while !pending.is_empty() {
            // Strategy name → members, in first-seen order.
            let mut groups: Vec<(String, Vec<(String, PlaceholderObject, usize)>)> = Vec::new();
            for (markup, object, index) in pending.drain(..) {
                let strategies = object.strategies();
                let name = strategies
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| DIRECT_STRATEGY.to_string());
                match groups.iter_mut().find(|(existing, _)| *existing == name) {
                    Some((_, members)) => members.push((markup, object, index)),
                    None => groups.push((name, vec![(markup, object, index)])),
                }
            }

            let mut next = Vec::new();
            for (name, members) in groups {
                let batch: Vec<(String, PlaceholderObject)> = members
                    .iter()
                    .map(|(markup, object, _)| (markup.clone(), object.clone()))
                    .collect();
                let mut produced: HashMap<String, RenderNode> =
                    match renderer.service().strategy(&name) {
                        Ok(strategy) => strategy.render(&batch, renderer)?,
                        Err(err) => {
                            warn!(strategy = %name, error = %err, "Skipping render strategy");
                            HashMap::new()
                        }
                    };
                trace!(strategy = %name, placeholders = batch.len(), produced = produced.len(), "Rendered placeholders");

                for (markup, object, index) in members {
                    match produced.remove(&markup) {
                        Some(node) => output.push((markup, node)),
                        None if index + 1 < object.strategies().len() => {
                            next.push((markup, object, index + 1));
                        }
                        None => output.push((markup, RenderNode::new())),
                    }
                }
            }
            pending = next;
        }

        Ok(output)
    }
}
