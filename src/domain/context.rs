//! Render context passed from the host to a controller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DomainError;

/// Named values describing how a batch of objects is rendered (view mode,
/// region, language) plus per-object identity fields derived by controllers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<String, Value>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Insert only when the key is not already present.
    pub fn insert_default(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.entry(key.into()).or_insert_with(|| value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Required field rendered as a string; numbers and booleans are accepted.
    pub fn require(&self, key: &str) -> Result<String, DomainError> {
        self.get_string(key)
            .ok_or_else(|| DomainError::missing_context(key))
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_fails_fast_on_missing_key() {
        let context = Context::new().with("view_mode", "full");
        assert_eq!(context.require("view_mode").expect("present"), "full");

        let error = context.require("id").expect_err("missing id");
        assert!(matches!(error, DomainError::MissingContext { key } if key == "id"));
    }

    #[test]
    fn require_accepts_numbers() {
        let context = Context::new().with("id", 42);
        assert_eq!(context.require("id").expect("numeric id"), "42");
    }

    #[test]
    fn insert_default_keeps_existing_values() {
        let mut context = Context::new().with("bundle", "article");
        context.insert_default("bundle", "node");
        context.insert_default("langcode", "en");
        assert_eq!(context.get_string("bundle").as_deref(), Some("article"));
        assert_eq!(context.get_string("langcode").as_deref(), Some("en"));
    }
}
