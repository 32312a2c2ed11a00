//! Render cache engine.
//!
//! - `keys` / `info` / `resolver`: cache id computation.
//! - `hooks`: alter listeners per controller kind.
//! - `stack`: recursion frames collecting nested metadata.
//! - `adapter` / `store` / `validate`: persistence per cache strategy.
//! - `placeholder`: deferred content tokens.

pub mod adapter;
pub mod config;
pub mod hooks;
pub mod info;
pub mod keys;
mod lock;
pub mod placeholder;
pub mod registry;
pub mod resolver;
pub mod stack;
pub mod store;
pub mod validate;

pub use adapter::BackendAdapter;
pub use config::RenderCacheConfig;
pub use hooks::{AlterEvent, AlterRegistry, CacheInfoAlter};
pub use info::{CacheHash, CacheInfo, MarkupOptions, RenderToMarkup};
pub use keys::HashAlgorithm;
pub use resolver::{
    CacheInfoProvider, ResolveEnv, ResolvePass, base_cache_hash, base_cache_keys, base_cache_tags,
    resolve_cache_info,
};
pub use stack::{MarkupRenderer, RenderStack};
pub use store::{CacheStore, CachedEntry, CachedRender, MemoryStore};
pub use validate::{AcceptAll, MaxAgeValidation, ValidationStrategy};
