use serde::Deserialize;

use crate::model::GeneratedImage;

/// Success body of the intermediary `/api/generate` endpoint.
#[derive(Deserialize, Debug)]
pub struct ProxyGenerateResp {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<GeneratedImage>>,
}

/// Success body of the upstream ImageFX endpoint. Only the fields we read.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ImageFxResp {
    #[serde(default)]
    pub image_panels: Option<Vec<ImagePanel>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ImagePanel {
    #[serde(default)]
    pub generated_images: Vec<EncodedImage>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EncodedImage {
    pub encoded_image: String,
}
