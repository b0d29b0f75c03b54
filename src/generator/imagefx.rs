use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::model::ImageFxResp;
use super::{GenerateError, Generation, Generator};
use crate::model::{AspectRatio, GeneratedImage};

pub const IMAGEFX_API_URL: &str = "https://aisandbox-pa.googleapis.com/v1:runImageFx";

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^a-zA-Z0-9]").expect("static regex"));

/// Direct client for the ImageFX endpoint. Used when no intermediary is
/// deployed; the caller supplies the upstream bearer token.
#[derive(Clone)]
pub struct ImageFxClient {
    http: Client,
    endpoint: Url,
    token: String,
    candidates: u32,
    model_name: String,
}

impl fmt::Debug for ImageFxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFxClient")
            .field("endpoint", &self.endpoint)
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

impl ImageFxClient {
    pub fn new(
        endpoint: Url,
        token: String,
        candidates: u32,
        model_name: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("imagen-batch/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            token,
            candidates,
            model_name,
        })
    }

    pub fn build_request(&self, body: &Value) -> Result<reqwest::Request> {
        self.http
            .post(self.endpoint.clone())
            .header("Accept", "*/*")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build ImageFX request")
    }
}

pub fn build_imagefx_request(
    prompt: &str,
    aspect: AspectRatio,
    candidates: u32,
    model_name: &str,
    now_millis: i64,
) -> Value {
    json!({
        "userInput": {
            "candidatesCount": candidates,
            "prompts": [prompt],
            "seed": now_millis % 1_000_000,
        },
        "clientContext": {
            "sessionId": format!(";{}", now_millis),
            "tool": "IMAGE_FX",
        },
        "modelInput": { "modelNameType": model_name },
        "aspectRatio": aspect,
    })
}

/// `<prompt with non-alphanumerics replaced, first 20 chars>_<millis>_<n>.jpg`
pub fn image_filename(prompt: &str, now_millis: i64, index: usize) -> String {
    let safe: String = UNSAFE_FILENAME_CHARS
        .replace_all(prompt, "_")
        .chars()
        .take(20)
        .collect();
    format!("{}_{}_{}.jpg", safe, now_millis, index + 1)
}

/// Map an ImageFX response to a [`Generation`]. Only the first panel is used.
pub fn parse_imagefx_response(
    prompt: &str,
    status: StatusCode,
    body: &str,
    now_millis: i64,
) -> Result<Generation, GenerateError> {
    if !status.is_success() {
        return Err(GenerateError::from_status(status, body));
    }
    let resp: ImageFxResp =
        serde_json::from_str(body).map_err(|_| GenerateError::invalid_body())?;
    let panel = resp
        .image_panels
        .and_then(|panels| panels.into_iter().next())
        .ok_or_else(GenerateError::no_images)?;
    if panel.generated_images.is_empty() {
        return Err(GenerateError::no_images());
    }
    let images = panel
        .generated_images
        .into_iter()
        .enumerate()
        .map(|(idx, img)| GeneratedImage {
            filename: image_filename(prompt, now_millis, idx),
            url: format!("data:image/jpeg;base64,{}", img.encoded_image),
        })
        .collect();
    Ok(Generation {
        prompt: prompt.to_string(),
        images,
    })
}

#[async_trait]
impl Generator for ImageFxClient {
    async fn generate(
        &self,
        prompt: &str,
        aspect: AspectRatio,
    ) -> Result<Generation, GenerateError> {
        let now_millis = Utc::now().timestamp_millis();
        let body = build_imagefx_request(prompt, aspect, self.candidates, &self.model_name, now_millis);
        let request = self
            .build_request(&body)
            .map_err(|err| GenerateError::Upstream(format!("{:#}", err)))?;
        info!(url = %request.url(), %aspect, candidates = self.candidates, "sending ImageFX request");

        let res = self
            .http
            .execute(request)
            .await
            .map_err(|err| GenerateError::from_transport(&err))?;
        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|err| GenerateError::from_transport(&err))?;
        debug!(%status, bytes = text.len(), "ImageFX response");

        let result = parse_imagefx_response(prompt, status, &text, now_millis);
        if let Err(err) = &result {
            warn!(%status, error = %err, "ImageFX generation failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_upstream_shape() {
        let body = build_imagefx_request("a cat", AspectRatio::Portrait, 4, "IMAGEN_3_1", 1_700_000_123_456);
        assert_eq!(body["userInput"]["candidatesCount"], 4);
        assert_eq!(body["userInput"]["prompts"][0], "a cat");
        assert_eq!(body["userInput"]["seed"], 123_456);
        assert_eq!(body["clientContext"]["sessionId"], ";1700000123456");
        assert_eq!(body["clientContext"]["tool"], "IMAGE_FX");
        assert_eq!(body["modelInput"]["modelNameType"], "IMAGEN_3_1");
        assert_eq!(body["aspectRatio"], "IMAGE_ASPECT_RATIO_PORTRAIT");
    }

    #[test]
    fn filenames_are_sanitized_and_truncated() {
        assert_eq!(image_filename("a cat!", 42, 0), "a_cat__42_1.jpg");
        assert_eq!(
            image_filename("a very long prompt about mountains", 7, 3),
            "a_very_long_prompt_a_7_4.jpg"
        );
    }

    #[test]
    fn first_panel_maps_to_data_uris() {
        let body = r#"{"imagePanels":[{"generatedImages":[{"encodedImage":"AAA"},{"encodedImage":"BBB"}]},{"generatedImages":[{"encodedImage":"CCC"}]}]}"#;
        let gen = parse_imagefx_response("dog", StatusCode::OK, body, 9).unwrap();
        assert_eq!(gen.images.len(), 2);
        assert_eq!(gen.images[0].url, "data:image/jpeg;base64,AAA");
        assert_eq!(gen.images[1].filename, "dog_9_2.jpg");
    }

    #[test]
    fn empty_panels_are_no_images() {
        for body in [r#"{}"#, r#"{"imagePanels":[]}"#, r#"{"imagePanels":[{"generatedImages":[]}]}"#] {
            let err = parse_imagefx_response("dog", StatusCode::OK, body, 1).unwrap_err();
            assert_eq!(err.to_string(), "no images produced");
        }
    }

    #[test]
    fn upstream_errors_are_classified() {
        let err = parse_imagefx_response("dog", StatusCode::UNAUTHORIZED, "{}", 1).unwrap_err();
        assert_eq!(err, GenerateError::Auth);
        let err = parse_imagefx_response(
            "dog",
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Request contains an invalid argument."}}"#,
            1,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Request contains an invalid argument.");
    }
}
