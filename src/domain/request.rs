//! The request dimensions a render is performed for.

use serde::{Deserialize, Serialize};

/// User id of the site super user, who bypasses role permissions.
pub const SUPER_USER_ID: u64 = 1;

/// Snapshot of the incoming request as seen by the render cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestInfo {
    pub method: String,
    pub base_root: String,
    pub uri: String,
    pub theme: String,
    pub user_id: u64,
    /// Role ids of the current user, in ascending order.
    pub roles: Vec<u64>,
    /// Negotiated language per configurable language type. Only included in
    /// cache identifiers when the site is multilingual.
    pub languages: Vec<String>,
    pub multilingual: bool,
    /// Set by the host when the response must not be served from cache.
    pub no_cache: bool,
    /// The edge proxy advertised ESI validation support.
    pub esi_validate: bool,
}

impl Default for RequestInfo {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            base_root: "http://localhost".to_string(),
            uri: "/".to_string(),
            theme: "default".to_string(),
            user_id: 0,
            roles: vec![1],
            languages: vec!["en".to_string()],
            multilingual: false,
            no_cache: false,
            esi_validate: false,
        }
    }
}

impl RequestInfo {
    pub fn is_safe_method(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET") || self.method.eq_ignore_ascii_case("HEAD")
    }
}
