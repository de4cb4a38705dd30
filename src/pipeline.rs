//! # pipeline: one content item from prompt to published post
//!
//! [`ContentPipeline::run`] is the single entry point the scheduler and the
//! CLI use. It never returns an error: every failure is logged with its
//! content type and genre, reported to the notifier, stored as the
//! pipeline's [`RunFailure`], and turned into `false`.
//!
//! Stages per run:
//! 1. pick genre + genre-specific options with the injected `Rng`
//! 2. build the prompt and ask the generator for an image
//! 3. archive the raw bytes (optional)
//! 4. normalize onto the content type's canvas
//! 5. compose the caption
//! 6. authenticate if needed, then upload once
//!
//! The session is held across runs and dropped when the service reports it
//! expired, so the next run logs in again.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::archive::{Archive, PublicationRecord};
use crate::caption::{CaptionInput, compose};
use crate::config::AppConfig;
use crate::content::{ContentRequest, ContentType, GeneratedImage};
use crate::delivery::{DeliveryAdapter, DeliveryItem, DeliveryOutcome, PublishingClient, Session};
use crate::error::{AuthError, UploadError};
use crate::generation::{ImageGenerator, build_prompt};
use crate::image_processing::normalize;
use crate::notify::{FailureReport, WebhookNotifier};

/// Platform upload ceiling. Larger output is still sent, with a warning.
pub const MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;

/// Why a run returned `false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunFailure {
    #[error("content type is disabled")]
    Disabled,
    #[error("content selection failed: {0}")]
    Selection(String),
    #[error("image generation failed: {0}")]
    Generation(String),
    #[error("provider returned no image")]
    NoImage,
    #[error("normalization failed: {0}")]
    Normalize(String),
    #[error("caption failed: {0}")]
    Caption(String),
    #[error(transparent)]
    Auth(AuthError),
    #[error(transparent)]
    Upload(UploadError),
}

impl RunFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            RunFailure::Disabled => "disabled",
            RunFailure::Selection(_) => "selection_failed",
            RunFailure::Generation(_) => "generation_failed",
            RunFailure::NoImage => "no_image",
            RunFailure::Normalize(_) => "normalize_failed",
            RunFailure::Caption(_) => "invalid_genre",
            RunFailure::Auth(err) | RunFailure::Upload(UploadError::Reauthentication(err)) => {
                err.kind()
            }
            RunFailure::Upload(UploadError::SessionExpired(_)) => "session_expired",
            RunFailure::Upload(_) => "upload_failed",
        }
    }

    /// Rejected credentials will fail every later run as well.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunFailure::Auth(AuthError::CredentialsInvalid(_))
                | RunFailure::Upload(UploadError::Reauthentication(
                    AuthError::CredentialsInvalid(_)
                ))
        )
    }
}

/// Result of [`ContentPipeline::run_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub requested: usize,
    /// One outcome per item that made it through preparation, in order.
    pub outcomes: Vec<DeliveryOutcome>,
}

impl BatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.success).count()
    }

    pub fn all_delivered(&self) -> bool {
        self.outcomes.len() == self.requested && self.delivered() == self.requested
    }
}

/// What the scheduler drives.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentRunner: Send {
    async fn run(&mut self, content_type: ContentType) -> bool;

    fn last_failure(&self) -> Option<RunFailure>;
}

struct PreparedItem {
    generated: GeneratedImage,
    item: DeliveryItem,
    image_key: Option<String>,
}

pub struct ContentPipeline<C, R = StdRng> {
    config: AppConfig,
    generator: Box<dyn ImageGenerator>,
    delivery: DeliveryAdapter<C>,
    session: Option<Session>,
    rng: R,
    archive: Option<Archive>,
    notifier: Option<WebhookNotifier>,
    last_failure: Option<RunFailure>,
}

fn pick_option<R: Rng + ?Sized>(
    options: &HashMap<String, Vec<String>>,
    genre: &str,
    rng: &mut R,
) -> Option<String> {
    options
        .get(genre)
        .and_then(|choices| choices.choose(rng))
        .cloned()
}

impl<C, R> ContentPipeline<C, R>
where
    C: PublishingClient,
    R: Rng + Send + Sync,
{
    pub fn new(
        config: AppConfig,
        generator: Box<dyn ImageGenerator>,
        delivery: DeliveryAdapter<C>,
        rng: R,
    ) -> Self {
        Self {
            config,
            generator,
            delivery,
            session: None,
            rng,
            archive: None,
            notifier: None,
            last_failure: None,
        }
    }

    pub fn with_archive(mut self, archive: Archive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_notifier(mut self, notifier: WebhookNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn last_failure(&self) -> Option<&RunFailure> {
        self.last_failure.as_ref()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Generates and publishes one item. `true` only when the upload succeeded.
    pub async fn run(&mut self, content_type: ContentType) -> bool {
        if !self.config.content_generation.for_type(content_type).enabled {
            info!(content_type = %content_type, "Content type disabled, skipping run");
            self.last_failure = Some(RunFailure::Disabled);
            return false;
        }

        let request = match self.select_request(content_type) {
            Ok(request) => request,
            Err(failure) => {
                self.fail(content_type, None, failure).await;
                return false;
            }
        };
        info!(
            content_type = %content_type,
            genre = %request.genre,
            sub_genre = ?request.sub_genre,
            style = ?request.style,
            theme = ?request.theme,
            "Starting content run"
        );

        let prepared = match self.prepare(content_type, request).await {
            Ok(prepared) => prepared,
            Err((genre, failure)) => {
                self.fail(content_type, Some(genre), failure).await;
                return false;
            }
        };
        let genre = prepared.generated.metadata.genre.clone();

        let session = match self.take_session().await {
            Ok(session) => session,
            Err(failure) => {
                self.fail(content_type, Some(genre), failure).await;
                return false;
            }
        };
        let outcome = self.delivery.upload_single(&session, &prepared.item).await;
        if !matches!(outcome.last_error, Some(UploadError::SessionExpired(_))) {
            self.session = Some(session);
        }
        self.record(content_type, &prepared, &outcome).await;

        match outcome.last_error {
            None => {
                info!(
                    content_type = %content_type,
                    genre = %genre,
                    post_id = ?outcome.post_id,
                    "Content published"
                );
                self.last_failure = None;
                true
            }
            Some(err) => {
                self.fail(content_type, Some(genre), RunFailure::Upload(err))
                    .await;
                false
            }
        }
    }

    /// Prepares `count` items, then delivers them with the configured retry policy.
    ///
    /// Items that fail before delivery are logged and left out of the outcomes.
    pub async fn run_batch(
        &mut self,
        content_type: ContentType,
        count: usize,
    ) -> Result<BatchReport, RunFailure> {
        if !self.config.content_generation.for_type(content_type).enabled {
            info!(content_type = %content_type, "Content type disabled, skipping batch");
            self.last_failure = Some(RunFailure::Disabled);
            return Err(RunFailure::Disabled);
        }

        let mut prepared = Vec::with_capacity(count);
        for index in 0..count {
            let request = match self.select_request(content_type) {
                Ok(request) => request,
                Err(failure) => {
                    self.fail(content_type, None, failure.clone()).await;
                    return Err(failure);
                }
            };
            match self.prepare(content_type, request).await {
                Ok(item) => prepared.push(item),
                Err((genre, failure)) => {
                    warn!(item = index, "Batch item dropped before delivery");
                    self.fail(content_type, Some(genre), failure).await;
                }
            }
        }

        let mut report = BatchReport {
            requested: count,
            outcomes: Vec::new(),
        };
        if prepared.is_empty() {
            return Ok(report);
        }

        let mut session = match self.take_session().await {
            Ok(session) => session,
            Err(failure) => {
                self.fail(content_type, None, failure.clone()).await;
                return Err(failure);
            }
        };
        let items: Vec<DeliveryItem> = prepared.iter().map(|p| p.item.clone()).collect();
        let max_attempts = self.config.delivery.max_attempts;
        let delay = self.config.delivery.retry_delay();
        report.outcomes = self
            .delivery
            .upload_batch(&mut session, &items, max_attempts, delay)
            .await;
        self.session = Some(session);

        for (item, outcome) in prepared.iter().zip(&report.outcomes) {
            self.record(content_type, item, outcome).await;
            if let Some(err) = &outcome.last_error {
                let genre = item.generated.metadata.genre.clone();
                self.fail(content_type, Some(genre), RunFailure::Upload(err.clone()))
                    .await;
            }
        }
        if report.all_delivered() {
            self.last_failure = None;
        }
        Ok(report)
    }

    fn select_request(&mut self, content_type: ContentType) -> Result<ContentRequest, RunFailure> {
        let settings = self.config.content_generation.for_type(content_type);
        let genre = settings
            .genres
            .choose(&mut self.rng)
            .cloned()
            .ok_or_else(|| RunFailure::Selection(format!("no genres configured for {content_type}")))?;

        let sub_genre = pick_option(&settings.sub_genres, &genre, &mut self.rng);
        let style = pick_option(&settings.styles, &genre, &mut self.rng);
        let theme = pick_option(&settings.themes, &genre, &mut self.rng);
        let palette = pick_option(&settings.palettes, &genre, &mut self.rng);

        Ok(ContentRequest {
            genre,
            sub_genre,
            theme,
            style,
            palette,
            placement: content_type.placement(),
            resolution: settings.resolution(),
        })
    }

    /// Generation through caption. Failures carry the genre for logging.
    async fn prepare(
        &mut self,
        content_type: ContentType,
        request: ContentRequest,
    ) -> Result<PreparedItem, (String, RunFailure)> {
        let genre = request.genre.clone();
        let fail = |failure: RunFailure| (genre.clone(), failure);

        let prompt = build_prompt(&request, &mut self.rng);
        let raw_bytes = match self.generator.generate(&prompt, &request.size()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(fail(RunFailure::NoImage)),
            Err(err) => return Err(fail(RunFailure::Generation(err.to_string()))),
        };
        let generated = GeneratedImage {
            raw_bytes,
            metadata: request,
            prompt,
        };

        let image_key = match &self.archive {
            Some(archive) => match archive.save_generated(&generated.raw_bytes).await {
                Ok(key) => Some(key),
                Err(err) => {
                    warn!(error = %err, genre = %genre, "Failed to archive generated image");
                    None
                }
            },
            None => None,
        };

        let settings = self.config.content_generation.for_type(content_type);
        let image = normalize(&generated.raw_bytes, settings.canvas(content_type))
            .map_err(|err| fail(RunFailure::Normalize(err.to_string())))?;
        if image.bytes.len() > MAX_UPLOAD_BYTES {
            warn!(
                content_type = %content_type,
                genre = %genre,
                bytes = image.bytes.len(),
                limit = MAX_UPLOAD_BYTES,
                "Normalized image exceeds upload size limit"
            );
        }

        let input = CaptionInput {
            genre: &generated.metadata.genre,
            style: generated.metadata.style.as_deref(),
            theme: generated.metadata.theme.as_deref(),
        };
        let caption = compose(input, &settings.genres, &self.config.captions, &mut self.rng)
            .map_err(|err| fail(RunFailure::Caption(err.to_string())))?;

        let item = DeliveryItem {
            image,
            caption,
            placement: content_type.placement(),
        };
        Ok(PreparedItem {
            generated,
            item,
            image_key,
        })
    }

    async fn take_session(&mut self) -> Result<Session, RunFailure> {
        if let Some(session) = self.session.take() {
            return Ok(session);
        }
        self.delivery.authenticate().await.map_err(RunFailure::Auth)
    }

    async fn record(
        &self,
        content_type: ContentType,
        prepared: &PreparedItem,
        outcome: &DeliveryOutcome,
    ) {
        let Some(archive) = &self.archive else {
            return;
        };
        let request = &prepared.generated.metadata;
        let record = PublicationRecord {
            content_type,
            genre: request.genre.clone(),
            sub_genre: request.sub_genre.clone(),
            style: request.style.clone(),
            theme: request.theme.clone(),
            palette: request.palette.clone(),
            prompt: prepared.generated.prompt.clone(),
            caption: prepared.item.caption.text.clone(),
            post_id: outcome.post_id.clone(),
            success: outcome.success,
            attempts_used: outcome.attempts_used,
            image_key: prepared.image_key.clone(),
            created_at: Utc::now().to_rfc3339(),
        };
        if let Err(err) = archive.save_record(&record).await {
            warn!(error = %err, content_type = %content_type, "Failed to archive publication record");
        }
    }

    async fn fail(&mut self, content_type: ContentType, genre: Option<String>, failure: RunFailure) {
        error!(
            content_type = %content_type,
            genre = genre.as_deref().unwrap_or("-"),
            error_kind = failure.kind(),
            error = %failure,
            "Content run failed"
        );
        if let Some(notifier) = &self.notifier {
            let report = FailureReport {
                content_type,
                genre,
                error_kind: failure.kind().to_string(),
                message: failure.to_string(),
                occurred_at: Utc::now(),
            };
            if let Err(err) = notifier.notify(&report).await {
                warn!(error = %err, "Failed to send failure notification");
            }
        }
        self.last_failure = Some(failure);
    }
}

#[async_trait]
impl<C, R> ContentRunner for ContentPipeline<C, R>
where
    C: PublishingClient,
    R: Rng + Send + Sync,
{
    async fn run(&mut self, content_type: ContentType) -> bool {
        ContentPipeline::run(self, content_type).await
    }

    fn last_failure(&self) -> Option<RunFailure> {
        self.last_failure.clone()
    }
}
