use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{PublishingClient, Session};
use crate::config::Credentials;
use crate::content::Placement;
use crate::error::{AuthError, UploadError};
use crate::image_processing::{NormalizedImage, extension_for_mime_type};

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    media_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

/// Failure body of a non-2xx response, reduced to `(code, readable message)`.
async fn read_failure(response: Response) -> (StatusCode, Option<String>, String) {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let envelope: ErrorEnvelope = serde_json::from_str(&body).unwrap_or_default();
    match envelope.error {
        Some(detail) => {
            let message = detail.message.unwrap_or_else(|| body.clone());
            (status, detail.code, message)
        }
        None => (status, None, body),
    }
}

fn media_path(placement: Placement) -> &'static str {
    match placement {
        Placement::Post => "feed",
        Placement::Story => "story",
    }
}

/// Publishing gateway spoken over JSON + multipart HTTP.
pub struct HttpPublisher {
    client: Client,
    base_url: String,
}

impl HttpPublisher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PublishingClient for HttpPublisher {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let response = self
            .client
            .post(format!("{}/v1/sessions", self.base_url))
            .json(&json!({
                "username": credentials.username,
                "password": credentials.password,
            }))
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let (status, code, message) = read_failure(response).await;
            return Err(match (status, code.as_deref()) {
                (_, Some("challenge_required")) => AuthError::ChallengeRequired(message),
                (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
                    AuthError::CredentialsInvalid(message)
                }
                (status, _) => AuthError::Transport(format!("{status}: {message}")),
            });
        }

        let payload: SessionResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Transport(format!("invalid session response: {err}")))?;
        let token = payload
            .session_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::Transport("session response without token".to_string()))?;
        Ok(Session::new(token, credentials.username.clone()))
    }

    async fn upload(
        &self,
        session: &Session,
        image: &NormalizedImage,
        caption: &str,
        placement: Placement,
    ) -> Result<String, UploadError> {
        let mime_type = image.mime_type();
        let file_name = format!("upload.{}", extension_for_mime_type(mime_type));
        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(file_name)
            .mime_str(mime_type)
            .map_err(|err| UploadError::Transport(err.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("caption", caption.to_string());

        debug!(
            placement = placement.as_str(),
            bytes = image.bytes.len(),
            width = image.width,
            height = image.height,
            "Uploading media"
        );
        let response = self
            .client
            .post(format!("{}/v1/media/{}", self.base_url, media_path(placement)))
            .bearer_auth(&session.token)
            .multipart(form)
            .send()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let (status, code, message) = read_failure(response).await;
            return Err(match (status, code.as_deref()) {
                (StatusCode::UNAUTHORIZED, _) | (_, Some("login_required")) => {
                    UploadError::SessionExpired(message)
                }
                (status, _) if status.is_client_error() => {
                    UploadError::Rejected(format!("{status}: {message}"))
                }
                (status, _) => UploadError::Transport(format!("{status}: {message}")),
            });
        }

        let payload: MediaResponse = response
            .json()
            .await
            .map_err(|err| UploadError::Transport(format!("invalid media response: {err}")))?;
        payload
            .media_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| UploadError::Transport("media response without media_id".to_string()))
    }
}
