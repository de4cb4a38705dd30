use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::{ImageGenerator, assert_ok_response, download_image, http_client};
use crate::error::GenerationError;

const MODELSCOPE_API_ROOT: &str = "https://api-inference.modelscope.cn";
const DEFAULT_MODEL: &str = "Tongyi-MAI/Z-Image-Turbo";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize)]
struct TaskSubmitResponse {
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    task_status: Option<String>,
    output_images: Option<Vec<String>>,
    error: Option<TaskError>,
}

#[derive(Debug, Deserialize)]
struct TaskError {
    code: Option<String>,
    message: Option<String>,
}

pub struct ModelScopeGenerator {
    client: Client,
    api_key: String,
    api_root: String,
    model: String,
    poll_interval: Duration,
    task_timeout: Duration,
}

impl ModelScopeGenerator {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, GenerationError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.to_string(),
            api_root: MODELSCOPE_API_ROOT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            task_timeout: DEFAULT_TASK_TIMEOUT,
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

    pub fn with_polling(mut self, poll_interval: Duration, task_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.task_timeout = task_timeout;
        self
    }

    async fn submit(&self, prompt: &str, size: &str) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.api_root))
            .bearer_auth(&self.api_key)
            .header("X-ModelScope-Async-Mode", "true")
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "size": size,
            }))
            .send()
            .await?;
        let response = assert_ok_response(response).await?;
        let response_text = response.text().await?;
        let payload: TaskSubmitResponse = serde_json::from_str(&response_text)
            .map_err(|err| GenerationError::Malformed(format!("{err}, body: {response_text}")))?;
        payload
            .task_id
            .ok_or_else(|| GenerationError::Malformed(format!("no task_id in {response_text}")))
    }

    /// Polls until the task settles. `Ok(None)` when it succeeded without output.
    async fn poll(&self, task_id: &str) -> Result<Option<String>, GenerationError> {
        let deadline = Instant::now() + self.task_timeout;
        let mut polls = 0u32;

        while Instant::now() <= deadline {
            polls += 1;
            let response = self
                .client
                .get(format!("{}/v1/tasks/{task_id}", self.api_root))
                .bearer_auth(&self.api_key)
                .header("X-ModelScope-Task-Type", "image_generation")
                .send()
                .await?;
            let response = assert_ok_response(response).await?;
            let response_text = response.text().await?;
            let payload: TaskStatusResponse = serde_json::from_str(&response_text).map_err(
                |err| GenerationError::Malformed(format!("{err}, body: {response_text}")),
            )?;
            let status = payload.task_status.ok_or_else(|| {
                GenerationError::Malformed(format!("no task_status in {response_text}"))
            })?;
            debug!(task_id, polls, status = %status, "Polled generation task");

            match status.as_str() {
                "SUCCEED" => {
                    return Ok(payload
                        .output_images
                        .and_then(|images| images.into_iter().next()));
                }
                "FAILED" => {
                    let message = payload
                        .error
                        .map(|err| {
                            format!(
                                "code={}, message={}",
                                err.code.unwrap_or_default(),
                                err.message.unwrap_or_default()
                            )
                        })
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(GenerationError::TaskFailed {
                        task_id: task_id.to_string(),
                        message,
                    });
                }
                _ => sleep(self.poll_interval).await,
            }
        }

        Err(GenerationError::Timeout {
            task_id: task_id.to_string(),
            polls,
        })
    }
}

#[async_trait]
impl ImageGenerator for ModelScopeGenerator {
    async fn generate(
        &self,
        prompt: &str,
        size: &str,
    ) -> Result<Option<Vec<u8>>, GenerationError> {
        let task_id = self.submit(prompt, size).await?;
        info!(task_id = %task_id, model = %self.model, "Generation task submitted");

        let Some(image_url) = self.poll(&task_id).await? else {
            warn!(task_id = %task_id, "Task succeeded without an output image");
            return Ok(None);
        };
        let bytes = download_image(&self.client, &image_url).await?;
        info!(task_id = %task_id, bytes = bytes.len(), "Image generated");
        Ok(Some(bytes))
    }
}
