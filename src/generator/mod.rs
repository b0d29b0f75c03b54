//! Clients for the remote image-generation API.
//!
//! The runner only sees the [`Generator`] trait. Two implementations exist:
//! - [`ProxyClient`] talks to the intermediary `/api/generate` endpoint.
//! - [`ImageFxClient`] talks to the upstream ImageFX endpoint directly.
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::model::{AspectRatio, FailureKind, GeneratedImage};

pub mod imagefx;
pub mod model;
pub mod proxy;

pub use imagefx::ImageFxClient;
pub use proxy::ProxyClient;

/// Failure of a single generation request. The `Display` text is what ends
/// up as the job's error message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerateError {
    #[error("token invalid or expired.")]
    Auth,
    #[error("rate limit exceeded, retry later.")]
    RateLimit,
    #[error("request timed out.")]
    Timeout,
    #[error("{0}")]
    Upstream(String),
    #[error("cancelled by user")]
    Cancelled,
}

impl GenerateError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GenerateError::Auth => FailureKind::Auth,
            GenerateError::RateLimit => FailureKind::RateLimit,
            GenerateError::Timeout => FailureKind::Timeout,
            GenerateError::Upstream(_) => FailureKind::Upstream,
            GenerateError::Cancelled => FailureKind::Cancelled,
        }
    }

    pub fn no_images() -> Self {
        GenerateError::Upstream("no images produced".into())
    }

    pub fn invalid_body() -> Self {
        GenerateError::Upstream("invalid response body".into())
    }

    /// Classify a transport-level failure from reqwest.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerateError::Timeout
        } else {
            GenerateError::Upstream(format!("request failed: {}", err))
        }
    }

    /// Map a non-2xx response to an error. The body is searched for a
    /// message; mapped statuses always win over it.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => GenerateError::Auth,
            StatusCode::TOO_MANY_REQUESTS => GenerateError::RateLimit,
            StatusCode::REQUEST_TIMEOUT => GenerateError::Timeout,
            _ => GenerateError::Upstream(
                error_message(body).unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            ),
        }
    }
}

/// Result of one successful generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub prompt: String,
    pub images: Vec<GeneratedImage>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, aspect: AspectRatio)
        -> Result<Generation, GenerateError>;
}

/// Pull a human readable message out of an error body. Accepts
/// `{"error": "..."}`, `{"error": {"message": "..."}}` and `{"message": "..."}`.
pub fn error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    let found = v
        .get("error")
        .and_then(|e| e.as_str().or_else(|| e.get("message").and_then(Value::as_str)))
        .or_else(|| v.get("message").and_then(Value::as_str))?;
    let found = found.trim();
    if found.is_empty() {
        None
    } else {
        Some(found.to_string())
    }
}
