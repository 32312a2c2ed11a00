//! Controllers and request-scoped render orchestration.

pub mod controller;
pub mod error;
pub mod placeholder;
pub mod service;
pub mod strategy;
