use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{ImageGenerator, assert_ok_response, download_image, http_client};
use crate::error::GenerationError;

const OPENAI_API_ROOT: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "dall-e-3";

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

pub struct OpenAiGenerator {
    client: Client,
    api_key: String,
    api_root: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, GenerationError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.to_string(),
            api_root: OPENAI_API_ROOT.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.api_root = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

#[async_trait]
impl ImageGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        size: &str,
    ) -> Result<Option<Vec<u8>>, GenerationError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "size": size,
            "quality": "hd",
            "n": 1,
            "response_format": "b64_json",
        });
        debug!(model = %self.model, size, "Submitting image generation request");

        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.api_root))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = assert_ok_response(response).await?;
        let response_text = response.text().await?;
        let payload: ImagesResponse = serde_json::from_str(&response_text)
            .map_err(|err| GenerationError::Malformed(format!("{err}, body: {response_text}")))?;

        if let Some(message) = payload.error.and_then(|err| err.message) {
            return Err(GenerationError::Request(message));
        }

        let Some(datum) = payload.data.into_iter().next() else {
            warn!(model = %self.model, "Provider returned no image");
            return Ok(None);
        };

        let bytes = match (datum.b64_json, datum.url) {
            (Some(encoded), _) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|err| GenerationError::Malformed(format!("invalid base64 image: {err}")))?,
            (None, Some(url)) => download_image(&self.client, &url).await?,
            (None, None) => {
                warn!(model = %self.model, "Provider response carried neither b64_json nor url");
                return Ok(None);
            }
        };
        info!(model = %self.model, bytes = bytes.len(), "Image generated");
        Ok(Some(bytes))
    }
}
