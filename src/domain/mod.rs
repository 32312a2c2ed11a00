//! Domain layer types and invariants.

pub mod assets;
pub mod context;
pub mod entities;
pub mod error;
pub mod render;
pub mod request;
pub mod tags;
pub mod types;
