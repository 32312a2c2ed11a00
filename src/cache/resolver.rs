//! Cache info resolution.
//!
//! Combines controller defaults, per-object contributions and alter listeners
//! into the final [`CacheInfo`] of one object, including its cache id.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::domain::context::Context;
use crate::domain::error::DomainError;
use crate::domain::request::RequestInfo;
use crate::domain::tags::CacheTags;
use crate::domain::types::Granularity;

use super::hooks::AlterRegistry;
use super::info::{CacheHash, CacheInfo};
use super::keys::{HashAlgorithm, cid_parts, join_cid};

/// Per-object cache contributions of a controller.
pub trait CacheInfoProvider {
    type Object: Clone + Serialize + DeserializeOwned;

    /// Controller kind, e.g. `entity` or `block`.
    fn kind(&self) -> &str;

    /// Per-object context, derived from the shared one (which already carries
    /// the object `id`).
    fn cache_context(&self, _object: &Self::Object, context: Context) -> Result<Context, DomainError> {
        Ok(context)
    }

    /// Object-level overrides merged onto the controller default.
    fn apply_cache_info(&self, _object: &Self::Object, _context: &Context, _info: &mut CacheInfo) {}

    fn cache_keys(&self, _object: &Self::Object, _context: &Context) -> Result<Vec<String>, DomainError> {
        Ok(base_cache_keys(self.kind()))
    }

    fn cache_hash(&self, _object: &Self::Object, context: &Context) -> Result<CacheHash, DomainError> {
        base_cache_hash(context)
    }

    fn cache_tags(&self, _object: &Self::Object, _context: &Context) -> Result<CacheTags, DomainError> {
        Ok(base_cache_tags(self.kind()))
    }

    fn cache_validate(
        &self,
        _object: &Self::Object,
        _context: &Context,
    ) -> Result<BTreeMap<String, Value>, DomainError> {
        Ok(BTreeMap::new())
    }
}

/// `render_cache:<kind>`
pub fn base_cache_keys(kind: &str) -> Vec<String> {
    vec!["render_cache".to_string(), kind.to_string()]
}

/// The object id; every context handed to a provider carries one.
pub fn base_cache_hash(context: &Context) -> Result<CacheHash, DomainError> {
    Ok(CacheHash::new().with("id", context.require("id")?))
}

/// `rendered` and `<kind>_view`, so whole kinds can be flushed at once.
pub fn base_cache_tags(kind: &str) -> CacheTags {
    CacheTags::new()
        .flag("rendered")
        .flag(format!("{kind}_view"))
}

/// Which rendering pass the resolution is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolvePass {
    #[default]
    Initial,
    /// The object is being rendered in place of its placeholder, so it is
    /// cached under its own id instead of being deferred again.
    Placeholder,
}

/// Request-scoped inputs shared by every resolution.
pub struct ResolveEnv<'a> {
    pub alters: &'a AlterRegistry,
    pub request: &'a RequestInfo,
    pub algorithm: HashAlgorithm,
    pub pass: ResolvePass,
}

/// Resolve the cache info of one object.
///
/// Returns the per-object context alongside the info, since later stages
/// (cacheability, rendering) need the derived fields.
pub fn resolve_cache_info<P>(
    provider: &P,
    object: &P::Object,
    context: Context,
    default: &CacheInfo,
    env: &ResolveEnv<'_>,
) -> Result<(CacheInfo, Context), DomainError>
where
    P: CacheInfoProvider + ?Sized,
{
    let kind = provider.kind();
    let context = provider.cache_context(object, context)?;

    let mut info = default.clone();
    provider.apply_cache_info(object, &context, &mut info);
    info.keys.extend(provider.cache_keys(object, &context)?);
    info.hash.extend(provider.cache_hash(object, &context)?);
    info.tags.merge(&provider.cache_tags(object, &context)?);
    info.validate.extend(provider.cache_validate(object, &context)?);

    // Rendered and unrendered entries must never share an id.
    info.hash
        .insert_bool("render_method", info.render_to_markup.is_enabled());
    if info.render_to_markup.is_enabled() {
        let options = serde_json::to_string(&info.render_to_markup)
            .map_err(|err| DomainError::invariant(format!("render options: {err}")))?;
        info.hash.insert("render_options", options);
    }

    env.alters.alter_cache_info(kind, &mut info, &context);

    if info.granularity == Some(Granularity::NO_CACHE) {
        info.cid = None;
        info.finalize();
        return Ok((info, context));
    }

    // A preset id (from the object or a listener) is used verbatim.
    if info.cid.is_some() {
        info.finalize();
        return Ok((info, context));
    }

    env.alters.alter_keys(kind, &mut info, &context);
    env.alters.alter_hash(kind, &mut info, &context);
    env.alters.alter_tags(kind, &mut info, &context);
    env.alters.alter_validate(kind, &mut info, &context);

    let mut parts = info.keys.clone();
    parts.extend(cid_parts(info.granularity, env.request));
    parts.push(env.algorithm.digest(&info.hash.digest_input()));
    env.alters.alter_cid(kind, &mut parts, &info, &context);

    let cid = join_cid(&parts);
    trace!(kind, cid = %cid, "Resolved cache id");

    if !info.render_strategy.is_empty() && env.pass == ResolvePass::Initial {
        info.placeholder_id = Some(cid);
        info.cid = None;
    } else if info.granularity == Some(Granularity::CUSTOM) {
        info.cid = None;
    } else {
        info.cid = Some(cid);
    }

    info.finalize();
    Ok((info, context))
}
