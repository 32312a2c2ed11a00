use std::error::Error as StdError;

use thiserror::Error;

use crate::{domain::error::DomainError, infra::error::InfraError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("no controller registered for kind `{0}`")]
    UnknownController(String),
    #[error("no post-render callback registered as `{0}`")]
    UnknownCallback(String),
    #[error("no placeholder function registered as `{0}`")]
    UnknownPlaceholderFunction(String),
    #[error("no render strategy registered as `{0}`")]
    UnknownStrategy(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("render failed: {0}")]
    Render(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AppError {
    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Error chain rendered as one message per source, outermost first.
    pub fn report(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut current = self.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        messages
    }
}
