//! Image generation capability and the prompt that feeds it.
//!
//! The pipeline only sees [`ImageGenerator`]; two HTTP providers implement it:
//! - [`OpenAiGenerator`]: synchronous images API, base64 payloads
//! - [`ModelScopeGenerator`]: async task API, submit then poll

mod modelscope;
mod openai;

use std::time::Duration;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use rand::Rng;
use rand::seq::IndexedRandom;
use reqwest::Client;

use crate::config::{GenerationConfig, ProviderKind};
use crate::content::ContentRequest;
use crate::error::GenerationError;

pub use modelscope::ModelScopeGenerator;
pub use openai::OpenAiGenerator;

const QUALITY_PHRASES: &str = "Exceptional artistic quality, intricate details, \
perfect composition, cinematic lighting, sharp focus, high resolution digital art. ";

const ARTISTIC_FLOURISHES: [&str; 5] = [
    "Hyper-realistic rendering. ",
    "Stunning visual complexity. ",
    "Breathtaking artistic interpretation. ",
    "Masterful use of light and shadow. ",
    "Exceptional level of detail and precision. ",
];

/// Anything that turns a prompt into image bytes.
///
/// `Ok(None)` means the provider answered but produced no image, which the
/// pipeline treats as an ordinary unsuccessful run.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, size: &str)
    -> Result<Option<Vec<u8>>, GenerationError>;
}

pub fn build_prompt<R: Rng + ?Sized>(request: &ContentRequest, rng: &mut R) -> String {
    let mut prompt = match &request.style {
        Some(style) => format!(
            "A highly detailed, professional {style} artwork in the {} genre, ",
            request.genre
        ),
        None => format!(
            "A highly detailed, professional artwork in the {} genre, ",
            request.genre
        ),
    };
    if let Some(sub_genre) = &request.sub_genre {
        prompt.push_str(&format!("specifically in the {sub_genre} sub-genre. "));
    }
    if let Some(theme) = &request.theme {
        prompt.push_str(&format!("Theme: {theme}. "));
    }
    if let Some(palette) = &request.palette {
        prompt.push_str(&format!("Color palette: {palette} tones. "));
    }
    prompt.push_str(QUALITY_PHRASES);
    if let Some(flourish) = ARTISTIC_FLOURISHES.choose(rng) {
        prompt.push_str(flourish);
    }
    prompt
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, GenerationError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(GenerationError::from)
}

pub(crate) async fn assert_ok_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, GenerationError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(GenerationError::Rejected { status, body })
}

pub(crate) async fn download_image(client: &Client, url: &str) -> Result<Vec<u8>, GenerationError> {
    let response = assert_ok_response(client.get(url).send().await?).await?;
    let bytes = response.bytes().await?;
    Ok(bytes.to_vec())
}

pub fn generator_from_config(
    config: &GenerationConfig,
    api_key: &str,
) -> Result<Box<dyn ImageGenerator>, GenerationError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let generator: Box<dyn ImageGenerator> = match config.provider {
        ProviderKind::OpenAi => {
            let mut generator = OpenAiGenerator::new(api_key, timeout)?;
            if let Some(base_url) = &config.base_url {
                generator = generator.with_base_url(base_url);
            }
            if let Some(model) = &config.model {
                generator = generator.with_model(model);
            }
            Box::new(generator)
        }
        ProviderKind::ModelScope => {
            let mut generator = ModelScopeGenerator::new(api_key, timeout)?.with_polling(
                Duration::from_millis(config.task_poll_interval_ms),
                Duration::from_secs(config.task_timeout_secs),
            );
            if let Some(base_url) = &config.base_url {
                generator = generator.with_base_url(base_url);
            }
            if let Some(model) = &config.model {
                generator = generator.with_model(model);
            }
            Box::new(generator)
        }
    };
    Ok(generator)
}
