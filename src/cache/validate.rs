//! Validation of retrieved entries.

use time::{Duration, OffsetDateTime};

use super::info::CacheInfo;
use super::store::CachedEntry;

/// Decides whether a stored entry may still be served.
pub trait ValidationStrategy: Send + Sync {
    fn validate(&self, entry: &CachedEntry, info: &CacheInfo) -> bool;
}

/// Accepts every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ValidationStrategy for AcceptAll {
    fn validate(&self, _entry: &CachedEntry, _info: &CacheInfo) -> bool {
        true
    }
}

/// Rejects entries older than the smallest max-age collected from their tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxAgeValidation;

impl ValidationStrategy for MaxAgeValidation {
    fn validate(&self, entry: &CachedEntry, _info: &CacheInfo) -> bool {
        let Some(max_age) = entry.data.metadata.cache.effective_max_age() else {
            return true;
        };
        let max_age = Duration::seconds(i64::try_from(max_age).unwrap_or(i64::MAX));
        // Past the representable range the entry never expires.
        entry
            .created
            .checked_add(max_age)
            .is_none_or(|until| until > OffsetDateTime::now_utc())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::cache::store::CachedRender;
    use crate::domain::render::{RecursionStorage, RenderNode};
    use crate::domain::types::Expire;

    fn entry(max_age: Option<u64>, age: Duration) -> CachedEntry {
        let mut metadata = RecursionStorage::default();
        metadata.cache.max_age.extend(max_age);
        CachedEntry {
            cid: "a".to_string(),
            data: CachedRender {
                node: RenderNode::markup("A"),
                metadata,
                preserved: BTreeMap::new(),
            },
            expire: Expire::Permanent,
            created: OffsetDateTime::now_utc() - age,
        }
    }

    #[test]
    fn max_age_rejects_stale_entries() {
        let info = CacheInfo::new("cache_render");
        assert!(MaxAgeValidation.validate(&entry(Some(60), Duration::seconds(10)), &info));
        assert!(!MaxAgeValidation.validate(&entry(Some(60), Duration::seconds(120)), &info));
        assert!(MaxAgeValidation.validate(&entry(None, Duration::days(30)), &info));
        assert!(AcceptAll.validate(&entry(Some(0), Duration::days(1)), &info));
    }

    #[test]
    fn max_age_beyond_representable_time_never_expires() {
        let info = CacheInfo::new("cache_render");
        assert!(MaxAgeValidation.validate(&entry(Some(u64::MAX), Duration::days(365)), &info));
        assert!(MaxAgeValidation.validate(&entry(Some(i64::MAX as u64), Duration::ZERO), &info));
    }
}
