//! Shared cache enumerations.

use std::ops::BitOr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Request dimensions folded into a cache identifier.
///
/// Positive values are bit flags; the two negative sentinels disable
/// identifier computation entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Granularity(i32);

impl Granularity {
    /// Never cache.
    pub const NO_CACHE: Self = Self(-1);
    /// The caller stores the output itself.
    pub const CUSTOM: Self = Self(-2);
    pub const PER_ROLE: Self = Self(0x0001);
    pub const PER_USER: Self = Self(0x0002);
    pub const PER_PAGE: Self = Self(0x0004);
    pub const GLOBAL: Self = Self(0x0008);

    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    /// True when every flag of `other` is set. Sentinels never contain flags.
    pub const fn contains(self, other: Self) -> bool {
        self.0 > 0 && other.0 > 0 && self.0 & other.0 == other.0
    }

    pub const fn is_cacheable(self) -> bool {
        self.0 != Self::NO_CACHE.0
    }
}

impl BitOr for Granularity {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// When an object is turned into markup relative to being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Store the unrendered tree; render fresh after every retrieval.
    NoRender = 0,
    /// Render to markup before storing.
    DirectRender = 1,
    /// Stamp the node and let the host evaluator render and store it.
    LateRender = 2,
}

impl CacheStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStrategy::NoRender => "no_render",
            CacheStrategy::DirectRender => "direct_render",
            CacheStrategy::LateRender => "late_render",
        }
    }
}

/// Lifetime of a persisted cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expire {
    #[default]
    Permanent,
    /// Removable on the next general cache wipe.
    Temporary,
    At(OffsetDateTime),
}

impl Expire {
    pub fn is_expired(self, now: OffsetDateTime) -> bool {
        matches!(self, Expire::At(at) if at <= now)
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    #[test]
    fn granularity_flags_combine() {
        let granularity = Granularity::PER_ROLE | Granularity::PER_PAGE;
        assert!(granularity.contains(Granularity::PER_ROLE));
        assert!(granularity.contains(Granularity::PER_PAGE));
        assert!(!granularity.contains(Granularity::PER_USER));
        assert_eq!(granularity.bits(), 5);
    }

    #[test]
    fn sentinels_contain_no_flags() {
        assert!(!Granularity::NO_CACHE.contains(Granularity::PER_ROLE));
        assert!(!Granularity::CUSTOM.contains(Granularity::PER_USER));
        assert!(!Granularity::NO_CACHE.is_cacheable());
        assert!(Granularity::CUSTOM.is_cacheable());
    }

    #[test]
    fn expire_at_checks_against_now() {
        let now = OffsetDateTime::now_utc();
        assert!(Expire::At(now - Duration::seconds(1)).is_expired(now));
        assert!(!Expire::At(now + Duration::minutes(5)).is_expired(now));
        assert!(!Expire::Permanent.is_expired(now));
    }
}
