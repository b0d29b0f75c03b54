use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::model::ProxyGenerateResp;
use super::{GenerateError, Generation, Generator};
use crate::model::AspectRatio;

/// Client for the intermediary generation endpoint. The intermediary holds
/// the upstream credentials and enforces its own timeout.
#[derive(Clone)]
pub struct ProxyClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for ProxyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ProxyClient {
    pub fn new(base_url: Url, token: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("imagen-batch/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn build_request(&self, prompt: &str, aspect: AspectRatio) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("api/generate")
            .context("invalid generation base URL")?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .json(&json!({ "prompt": prompt, "aspectRatio": aspect }))
            .build()
            .context("failed to build generation request")
    }
}

/// Turn an intermediary response into a [`Generation`].
pub fn parse_proxy_response(
    prompt: &str,
    status: StatusCode,
    body: &str,
) -> Result<Generation, GenerateError> {
    if !status.is_success() {
        return Err(GenerateError::from_status(status, body));
    }
    let resp: ProxyGenerateResp =
        serde_json::from_str(body).map_err(|_| GenerateError::invalid_body())?;
    let images = resp
        .images
        .filter(|images| !images.is_empty())
        .ok_or_else(GenerateError::no_images)?;
    Ok(Generation {
        prompt: resp.prompt.unwrap_or_else(|| prompt.to_string()),
        images,
    })
}

#[async_trait]
impl Generator for ProxyClient {
    async fn generate(
        &self,
        prompt: &str,
        aspect: AspectRatio,
    ) -> Result<Generation, GenerateError> {
        let request = self
            .build_request(prompt, aspect)
            .map_err(|err| GenerateError::Upstream(format!("{:#}", err)))?;
        info!(url = %request.url(), %aspect, "sending generation request");

        let res = self
            .http
            .execute(request)
            .await
            .map_err(|err| GenerateError::from_transport(&err))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|err| GenerateError::from_transport(&err))?;
        debug!(%status, bytes = body.len(), "generation response");

        let result = parse_proxy_response(prompt, status, &body);
        if let Err(err) = &result {
            warn!(%status, error = %err, "generation failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ProxyClient {
        ProxyClient::new(
            Url::parse("http://localhost:3000/").unwrap(),
            "user-token".into(),
            Duration::from_secs(20),
        )
        .unwrap()
    }

    #[test]
    fn build_request_sets_headers_and_body() {
        let request = client()
            .build_request("draw a cat", AspectRatio::Square)
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/api/generate");
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer user-token"
        );
        let body: serde_json::Value =
            serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["prompt"], "draw a cat");
        assert_eq!(body["aspectRatio"], "IMAGE_ASPECT_RATIO_SQUARE");
    }

    #[test]
    fn success_body_yields_images() {
        let body = r#"{"prompt":"draw a cat","images":[{"filename":"a.jpg","url":"data:image/jpeg;base64,AA=="}]}"#;
        let gen = parse_proxy_response("draw a cat", StatusCode::OK, body).unwrap();
        assert_eq!(gen.prompt, "draw a cat");
        assert_eq!(gen.images.len(), 1);
        assert_eq!(gen.images[0].filename, "a.jpg");
    }

    #[test]
    fn missing_or_empty_images_is_an_error() {
        let err = parse_proxy_response("p", StatusCode::OK, r#"{"prompt":"p"}"#).unwrap_err();
        assert_eq!(err.to_string(), "no images produced");
        let err =
            parse_proxy_response("p", StatusCode::OK, r#"{"prompt":"p","images":[]}"#).unwrap_err();
        assert_eq!(err.to_string(), "no images produced");
    }

    #[test]
    fn non_json_success_is_an_error() {
        let err = parse_proxy_response("p", StatusCode::OK, "<html/>").unwrap_err();
        assert_eq!(err, GenerateError::Upstream("invalid response body".into()));
    }

    #[test]
    fn timeout_status_from_intermediary() {
        let err = parse_proxy_response(
            "p",
            StatusCode::REQUEST_TIMEOUT,
            r#"{"error":"Request timeout."}"#,
        )
        .unwrap_err();
        assert_eq!(err, GenerateError::Timeout);
    }

    #[tokio::test]
    async fn silent_server_times_out_locally() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let client = ProxyClient::new(
            Url::parse(&format!("http://{}/", addr)).unwrap(),
            "user-token".into(),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = client
            .generate("draw a cat", AspectRatio::Square)
            .await
            .unwrap_err();
        assert_eq!(err, GenerateError::Timeout);
        assert_eq!(err.to_string(), "request timed out.");
        server.abort();
    }
}
