//! Render output caching for nested content trees.
//!
//! Controllers compute a cache id per object, serve hits from a
//! [`cache::CacheStore`] and render misses inside recursion frames so that
//! cache tags, assets and deferred callbacks of nested content reach the
//! output that embeds it.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
