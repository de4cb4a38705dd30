//! Failure notifications posted to a webhook.

use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::{NotificationConfig, validate_http_url};
use crate::content::ContentType;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub content_type: ContentType,
    pub genre: Option<String>,
    pub error_kind: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(NOTIFY_TIMEOUT).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.to_string(),
        })
    }

    /// `None` when notifications are switched off.
    pub fn from_config(config: &NotificationConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let Some(raw) = config.webhook_url.as_deref() else {
            bail!("notifications enabled without webhook_url");
        };
        let url = validate_http_url(raw)?;
        Ok(Some(Self::new(url.as_str())?))
    }

    pub async fn notify(&self, report: &FailureReport) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(report)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("webhook returned {status}: {body}");
        }
        debug!(
            content_type = %report.content_type,
            error_kind = %report.error_kind,
            "Failure notification delivered"
        );
        Ok(())
    }
}
