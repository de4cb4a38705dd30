//! # delivery: session lifecycle and uploads to the publishing service
//!
//! [`PublishingClient`] is the raw capability (one login, one upload).
//! [`DeliveryAdapter`] layers the delivery rules on top of it:
//! - `upload_single` makes exactly one attempt
//! - `upload_batch` walks items one at a time, retrying each up to
//!   `max_attempts` with a fixed delay, and never aborts the batch
//! - an expired session is replaced by logging in again during a batch
//!
//! Uploads expect a [`NormalizedImage`]; nothing here resizes.

mod http;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use tracing::{info, warn};

use crate::caption::Caption;
use crate::config::Credentials;
use crate::content::Placement;
use crate::error::{AuthError, UploadError};
use crate::image_processing::NormalizedImage;

pub use http::HttpPublisher;

/// Authenticated handle for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub established_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
            established_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryItem {
    pub image: NormalizedImage,
    pub caption: Caption,
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub attempts_used: u32,
    pub post_id: Option<String>,
    pub last_error: Option<UploadError>,
}

impl DeliveryOutcome {
    fn delivered(post_id: String, attempts_used: u32) -> Self {
        Self {
            success: true,
            attempts_used,
            post_id: Some(post_id),
            last_error: None,
        }
    }

    fn failed(error: UploadError, attempts_used: u32) -> Self {
        Self {
            success: false,
            attempts_used,
            post_id: None,
            last_error: Some(error),
        }
    }
}

/// Remote publishing service.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PublishingClient: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError>;

    /// Returns the remote post id.
    async fn upload(
        &self,
        session: &Session,
        image: &NormalizedImage,
        caption: &str,
        placement: Placement,
    ) -> Result<String, UploadError>;
}

pub struct DeliveryAdapter<C> {
    client: C,
    credentials: Credentials,
}

impl<C: PublishingClient> DeliveryAdapter<C> {
    pub fn new(client: C, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    pub async fn authenticate(&self) -> Result<Session, AuthError> {
        match self.client.authenticate(&self.credentials).await {
            Ok(session) => {
                info!(username = %session.username, "Authenticated with publishing service");
                Ok(session)
            }
            Err(err) => {
                warn!(
                    username = %self.credentials.username,
                    error_kind = err.kind(),
                    error = %err,
                    "Authentication failed"
                );
                Err(err)
            }
        }
    }

    pub async fn upload_single(&self, session: &Session, item: &DeliveryItem) -> DeliveryOutcome {
        match self.attempt(session, item).await {
            Ok(post_id) => DeliveryOutcome::delivered(post_id, 1),
            Err(err) => DeliveryOutcome::failed(err, 1),
        }
    }

    /// Uploads `items` in order. Outcomes line up with the input positions.
    pub async fn upload_batch(
        &self,
        session: &mut Session,
        items: &[DeliveryItem],
        max_attempts: u32,
        delay: Duration,
    ) -> Vec<DeliveryOutcome> {
        let max_attempts = max_attempts.max(1);
        let mut outcomes = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            let mut attempt = 0;
            let outcome = loop {
                attempt += 1;
                let err = match self.attempt(session, item).await {
                    Ok(post_id) => break DeliveryOutcome::delivered(post_id, attempt),
                    Err(err) => err,
                };
                warn!(
                    item = index,
                    attempt,
                    max_attempts,
                    placement = item.placement.as_str(),
                    error = %err,
                    "Upload attempt failed"
                );

                if matches!(err, UploadError::SessionExpired(_)) {
                    match self.authenticate().await {
                        Ok(fresh) => *session = fresh,
                        Err(auth) => {
                            break DeliveryOutcome::failed(
                                UploadError::Reauthentication(auth),
                                attempt,
                            );
                        }
                    }
                }

                if attempt >= max_attempts {
                    break DeliveryOutcome::failed(err, attempt);
                }
                tokio::time::sleep(delay).await;
            };
            outcomes.push(outcome);
        }

        let delivered = outcomes.iter().filter(|outcome| outcome.success).count();
        info!(
            items = items.len(),
            delivered,
            failed = items.len() - delivered,
            "Batch delivery finished"
        );
        outcomes
    }

    async fn attempt(&self, session: &Session, item: &DeliveryItem) -> Result<String, UploadError> {
        let post_id = self
            .client
            .upload(session, &item.image, &item.caption.text, item.placement)
            .await?;
        info!(
            post_id = %post_id,
            placement = item.placement.as_str(),
            "Upload succeeded"
        );
        Ok(post_id)
    }
}
