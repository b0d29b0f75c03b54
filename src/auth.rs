use anyhow::Context;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::generator::error_message;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username and password are required")]
    MissingCredentials,
    #[error("{0}")]
    Rejected(String),
    #[error("login request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid login response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Client for the intermediary's `/api/auth/login` endpoint.
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: Client,
    base_url: Url,
}

impl AuthClient {
    pub fn new(base_url: Url, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent("imagen-batch/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AuthError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let endpoint = self
            .base_url
            .join("api/auth/login")
            .map_err(|e| AuthError::InvalidResponse(format!("bad base URL: {}", e)))?;

        let res = self
            .http
            .post(endpoint)
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            let msg = error_message(&body).unwrap_or_else(|| "Login failed".to_string());
            warn!(%status, username, "login rejected");
            return Err(AuthError::Rejected(msg));
        }

        let payload = parse_login_response(&body)?;
        info!(username, "login succeeded");
        Ok(payload)
    }
}

pub fn parse_login_response(body: &str) -> Result<LoginResponse, AuthError> {
    let payload: LoginResponse =
        serde_json::from_str(body).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
    if payload.token.trim().is_empty() {
        return Err(AuthError::InvalidResponse("empty token".into()));
    }
    Ok(payload)
}
