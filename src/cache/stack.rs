//! Recursion stack for nested renders.
//!
//! Every nested render opens a frame; metadata stripped from finished children
//! is recorded in the current frame and handed back when the frame closes, so
//! it can be re-attached to the parent's output even when the parent is
//! served from cache.

use tracing::trace;

use crate::application::error::AppError;
use crate::domain::render::{RecursionStorage, RenderNode};

/// Host evaluator turning a render tree into markup.
///
/// Implementations mark rendered nodes as printed; a printed node renders to
/// an empty string.
pub trait MarkupRenderer: Send + Sync {
    fn render(&self, node: &mut RenderNode) -> Result<String, AppError>;
}

/// Request-scoped stack of recursion frames.
///
/// Level 0 is the top level of the request. Frames above it only exist while
/// a nested render is in progress.
#[derive(Debug)]
pub struct RenderStack {
    frames: Vec<Vec<RecursionStorage>>,
}

impl Default for RenderStack {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderStack {
    pub fn new() -> Self {
        Self {
            frames: vec![Vec::new()],
        }
    }

    pub fn recursion_level(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn is_recursive(&self) -> bool {
        self.recursion_level() > 0
    }

    pub fn increase_recursion(&mut self) {
        self.frames.push(Vec::new());
        trace!(level = self.recursion_level(), "Entered render frame");
    }

    /// Close the current frame and return its aggregated storage.
    ///
    /// The storage is not pushed to the parent frame: the caller decides
    /// where it belongs, typically by carrying it on the rendered node.
    ///
    /// # Panics
    ///
    /// Panics when called at level 0, which means increase and decrease calls
    /// are unbalanced.
    pub fn decrease_recursion(&mut self) -> RecursionStorage {
        assert!(
            self.is_recursive(),
            "decrease_recursion called at recursion level 0"
        );
        let records = self.frames.pop().unwrap_or_default();
        trace!(level = self.recursion_level(), "Left render frame");
        aggregate(records)
    }

    /// Aggregated storage of the current frame, without removing it.
    pub fn recursion_storage(&self) -> RecursionStorage {
        self.current().iter().cloned().fold(
            RecursionStorage::default(),
            |mut acc, record| {
                acc.merge(record);
                acc
            },
        )
    }

    /// Replace the records of the current frame.
    pub fn set_recursion_storage(&mut self, records: Vec<RecursionStorage>) {
        *self.current_mut() = records;
    }

    /// Record storage in the current frame as-is.
    pub fn push_storage(&mut self, storage: RecursionStorage) {
        if !storage.is_empty() {
            self.current_mut().push(storage);
        }
    }

    /// Strip a node's metadata (and optionally its assets) into the current
    /// frame. Returns what was recorded.
    pub fn add_recursion_storage(
        &mut self,
        node: &mut RenderNode,
        collect_attached: bool,
    ) -> RecursionStorage {
        let mut storage = node.take_metadata();
        if collect_attached {
            storage.attached = node.take_attached();
        }
        self.push_storage(storage.clone());
        storage
    }

    /// Render a node to markup inside its own frame.
    ///
    /// Storage carried by the node seeds the frame; everything the render
    /// produces, including the node's own metadata and assets, is recorded
    /// there. Returns the markup and the aggregated frame storage.
    pub fn render_markup<E>(
        &mut self,
        node: &mut RenderNode,
        render: impl FnOnce(&mut Self, &mut RenderNode) -> Result<String, E>,
    ) -> Result<(String, RecursionStorage), E> {
        self.increase_recursion();
        if let Some(carried) = node.recursion_storage.take() {
            self.push_storage(*carried);
        }

        let result = render(self, node);
        if result.is_ok() {
            self.add_recursion_storage(node, true);
        }
        let storage = self.decrease_recursion();
        result.map(|markup| (markup, storage))
    }

    /// Render a node to a markup-only node that carries the collected
    /// metadata on its top level.
    pub fn render<E>(
        &mut self,
        mut node: RenderNode,
        render: impl FnOnce(&mut Self, &mut RenderNode) -> Result<String, E>,
    ) -> Result<RenderNode, E> {
        let (markup, storage) = self.render_markup(&mut node, render)?;
        let mut rendered = RenderNode::markup(markup);
        rendered.absorb(storage);
        Ok(rendered)
    }

    /// Hand storage collected so far in the current frame to `node`, then
    /// start a fresh frame for the next sibling.
    ///
    /// Used by controllers that render a batch of objects inside a single
    /// frame. An empty node gets nothing and the storage is dropped.
    pub fn recursion_step(&mut self, node: &mut RenderNode) {
        let storage = self.decrease_recursion();
        if !node.is_empty() && !storage.is_empty() {
            node.carry(storage);
        }
        self.increase_recursion();
    }

    fn current(&self) -> &[RecursionStorage] {
        self.frames.last().map(Vec::as_slice).unwrap_or_default()
    }

    fn current_mut(&mut self) -> &mut Vec<RecursionStorage> {
        if self.frames.is_empty() {
            self.frames.push(Vec::new());
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

fn aggregate(records: Vec<RecursionStorage>) -> RecursionStorage {
    records
        .into_iter()
        .fold(RecursionStorage::default(), |mut acc, record| {
            acc.merge(record);
            acc
        })
}
