//! Host objects the bundled controllers know how to cache.

use serde::{Deserialize, Serialize};

use super::render::RenderNode;
use super::types::Granularity;

/// A content entity (node, user, comment, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_type: String,
    pub id: String,
    #[serde(default)]
    pub revision_id: Option<String>,
    #[serde(default)]
    pub bundle: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub body: String,
    /// Last modification as a unix timestamp; any change invalidates entries.
    #[serde(default)]
    pub changed: i64,
}

/// A block placed in a theme region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub bid: String,
    pub module: String,
    pub delta: String,
    pub region: String,
    /// Block-declared granularity; absent means never cache.
    #[serde(default)]
    pub cache: Option<Granularity>,
    #[serde(default)]
    pub body: String,
    /// Name of an active context-module context influencing the block.
    #[serde(default)]
    pub context: Option<String>,
}

/// The assembled page wrapping the main content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub callback: String,
    pub content: RenderNode,
}
