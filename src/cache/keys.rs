//! Cache identifier building blocks.
//!
//! A cache id is `keys ++ request parts ++ digest(hash values)` joined with
//! `:`. The request parts come from the granularity flags; the digest keeps
//! identifiers short no matter how many hash fields a controller adds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use crate::domain::request::{RequestInfo, SUPER_USER_ID};
use crate::domain::types::Granularity;

/// Digest used for the hash component of a cache id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Lowercase hex digest of `input`.
    pub fn digest(self, input: &str) -> String {
        match self {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(input.as_bytes())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported hash algorithm `{0}`")]
pub struct UnknownHashAlgorithm(pub String);

impl FromStr for HashAlgorithm {
    type Err = UnknownHashAlgorithm;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(UnknownHashAlgorithm(other.to_string())),
        }
    }
}

/// Request-derived id parts for a granularity.
///
/// Order is fixed: theme, languages (multilingual sites only), roles, user,
/// page. Sentinel granularities contribute only the theme.
pub fn cid_parts(granularity: Option<Granularity>, request: &RequestInfo) -> Vec<String> {
    let mut parts = vec![request.theme.clone()];

    if request.multilingual {
        parts.extend(request.languages.iter().cloned());
    }

    let Some(granularity) = granularity else {
        return parts;
    };

    if granularity.contains(Granularity::PER_ROLE) && !granularity.contains(Granularity::PER_USER)
    {
        // The super user bypasses role permissions, so shares no cache with
        // other holders of the same roles.
        if request.user_id == SUPER_USER_ID {
            parts.push(format!("u.{SUPER_USER_ID}"));
        }
        let roles: Vec<String> = request.roles.iter().map(u64::to_string).collect();
        parts.push(format!("r.{}", roles.join(",")));
    } else if granularity.contains(Granularity::PER_USER) {
        parts.push(format!("u.{}", request.user_id));
    }

    if granularity.contains(Granularity::PER_PAGE) {
        parts.push(format!("{}{}", request.base_root, request.uri));
    }

    parts
}

/// Final cache id from its ordered parts.
pub fn join_cid(parts: &[String]) -> String {
    parts.join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RequestInfo {
        RequestInfo {
            theme: "bartik".to_string(),
            user_id: 5,
            roles: vec![2, 3],
            uri: "/node/1".to_string(),
            ..RequestInfo::default()
        }
    }

    #[test]
    fn per_role_adds_sorted_roles() {
        let parts = cid_parts(Some(Granularity::PER_ROLE), &request());
        assert_eq!(parts, ["bartik", "r.2,3"]);
    }

    #[test]
    fn per_role_marks_super_user() {
        let request = RequestInfo {
            user_id: SUPER_USER_ID,
            ..request()
        };
        let parts = cid_parts(Some(Granularity::PER_ROLE), &request);
        assert_eq!(parts, ["bartik", "u.1", "r.2,3"]);
    }

    #[test]
    fn per_user_wins_over_per_role() {
        let parts = cid_parts(
            Some(Granularity::PER_ROLE | Granularity::PER_USER),
            &request(),
        );
        assert_eq!(parts, ["bartik", "u.5"]);
    }

    #[test]
    fn per_page_appends_full_url() {
        let parts = cid_parts(Some(Granularity::PER_PAGE), &request());
        assert_eq!(parts, ["bartik", "http://localhost/node/1"]);
    }

    #[test]
    fn multilingual_sites_add_languages() {
        let request = RequestInfo {
            multilingual: true,
            languages: vec!["de".to_string(), "en".to_string()],
            ..request()
        };
        let parts = cid_parts(Some(Granularity::GLOBAL), &request);
        assert_eq!(parts, ["bartik", "de", "en"]);
    }

    #[test]
    fn digests_are_stable_hex() {
        let sha256 = HashAlgorithm::Sha256.digest("1-node-article");
        assert_eq!(sha256.len(), 64);
        assert_eq!(sha256, HashAlgorithm::Sha256.digest("1-node-article"));
        assert_ne!(sha256, HashAlgorithm::Sha256.digest("2-node-article"));
        assert_eq!(HashAlgorithm::Sha512.digest("x").len(), 128);
        assert_eq!(
            HashAlgorithm::Sha256.digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn parses_algorithm_names() {
        assert_eq!("SHA512".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Sha512));
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
