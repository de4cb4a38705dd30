use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::caption::{AI_ART_TAGS, genre_tag};
use crate::content::{ContentType, parse_resolution};
use crate::error::ConfigError;
use crate::image_processing::Canvas;

pub const POST_CANVAS: (i64, i64) = (1080, 1080);
pub const STORY_CANVAS: (i64, i64) = (1080, 1920);
/// Largest side a baseline JPEG can encode.
pub const MAX_CANVAS_SIDE: i64 = 65_535;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
    pub content_generation: ContentGenerationConfig,
    #[serde(default)]
    pub captions: CaptionConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    ModelScope,
}

impl ProviderKind {
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::ModelScope => "MODELSCOPE_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Overrides the provider's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_task_poll_interval_ms")]
    pub task_poll_interval_ms: u64,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: None,
            model: None,
            request_timeout_secs: default_request_timeout_secs(),
            task_poll_interval_ms: default_task_poll_interval_ms(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishingConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentGenerationConfig {
    #[serde(default = "ContentTypeConfig::default_posts")]
    pub posts: ContentTypeConfig,
    #[serde(default)]
    pub stories: ContentTypeConfig,
}

impl ContentGenerationConfig {
    pub fn for_type(&self, content_type: ContentType) -> &ContentTypeConfig {
        match content_type {
            ContentType::Posts => &self.posts,
            ContentType::Stories => &self.stories,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CanvasSize {
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentTypeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub sub_genres: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub styles: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub themes: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub palettes: HashMap<String, Vec<String>>,
    /// Size requested from the provider, e.g. `1024x1024`.
    #[serde(default)]
    pub resolution: Option<String>,
    /// Final platform canvas. Defaults depend on the content type.
    #[serde(default)]
    pub canvas: Option<CanvasSize>,
    #[serde(default)]
    pub background: Option<[u8; 3]>,
}

impl ContentTypeConfig {
    fn default_posts() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
            .as_deref()
            .and_then(parse_resolution)
            .unwrap_or((1024, 1024))
    }

    pub fn canvas(&self, content_type: ContentType) -> Canvas {
        let (width, height) = match (self.canvas, content_type) {
            (Some(size), _) => (size.width, size.height),
            (None, ContentType::Posts) => POST_CANVAS,
            (None, ContentType::Stories) => STORY_CANVAS,
        };
        let canvas = Canvas::new(width, height);
        match self.background {
            Some(background) => canvas.with_background(background),
            None => canvas,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptionConfig {
    /// Prefix template sentences with an emoji.
    #[serde(default = "default_true")]
    pub use_emojis: bool,
    #[serde(default = "default_hashtag_style")]
    pub hashtag_style: String,
    #[serde(default)]
    pub custom_hashtags: Vec<String>,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            use_emojis: true,
            hashtag_style: default_hashtag_style(),
            custom_hashtags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppliesTo {
    Posts,
    Stories,
    #[default]
    Both,
}

impl AppliesTo {
    pub fn content_types(self) -> &'static [ContentType] {
        match self {
            AppliesTo::Posts => &[ContentType::Posts],
            AppliesTo::Stories => &[ContentType::Stories],
            AppliesTo::Both => &ContentType::ALL,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleEntryConfig {
    pub time: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub applies_to: AppliesTo,
}

/// A validated daily trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub trigger_time: NaiveTime,
    pub enabled: bool,
    pub applies_to: AppliesTo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default)]
    pub daily_runs: Vec<ScheduleEntryConfig>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            daily_runs: Vec::new(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl SchedulingConfig {
    pub fn entries(&self) -> Result<Vec<ScheduleEntry>, ConfigError> {
        self.daily_runs
            .iter()
            .map(|run| {
                let trigger_time = parse_time_of_day(&run.time).ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "scheduling.daily_runs time '{}' is not HH:MM",
                        run.time
                    ))
                })?;
                Ok(ScheduleEntry {
                    trigger_time,
                    enabled: run.enabled,
                    applies_to: run.applies_to,
                })
            })
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl ArchiveConfig {
    pub fn resolve_dir(&self) -> PathBuf {
        if let Some(dir) = &self.dir {
            return dir.clone();
        }
        let mut base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        base.push("ai-post-pipeline");
        base
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_hashtag_style() -> String {
    "comprehensive".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_task_poll_interval_ms() -> u64 {
    5_000
}

fn default_task_timeout_secs() -> u64 {
    5 * 60
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    30
}

pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

pub fn validate_http_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid("url must not be empty".to_string()));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|err| ConfigError::Invalid(format!("invalid url '{trimmed}': {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ConfigError::Invalid(format!(
            "only http or https urls are allowed, got '{scheme}'"
        ))),
    }
}

impl AppConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            serde_yaml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for content_type in ContentType::ALL {
            let section = self.content_generation.for_type(content_type);
            if !section.enabled {
                continue;
            }
            if section.genres.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "content_generation.{content_type} is enabled but lists no genres"
                )));
            }
            if let Some(resolution) = &section.resolution {
                if parse_resolution(resolution).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "content_generation.{content_type}.resolution '{resolution}' is not WxH"
                    )));
                }
            }
            let canvas = section.canvas(content_type);
            if canvas.width <= 0 || canvas.height <= 0 {
                return Err(ConfigError::Invalid(format!(
                    "content_generation.{content_type}.canvas must be positive, got {}x{}",
                    canvas.width, canvas.height
                )));
            }
            if canvas.width > MAX_CANVAS_SIDE || canvas.height > MAX_CANVAS_SIDE {
                return Err(ConfigError::Invalid(format!(
                    "content_generation.{content_type}.canvas sides must not exceed {MAX_CANVAS_SIDE}, got {}x{}",
                    canvas.width, canvas.height
                )));
            }
        }

        self.validate_custom_hashtags()?;

        self.scheduling.entries()?;

        if self.delivery.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "delivery.max_attempts must be at least 1".to_string(),
            ));
        }

        match &self.publishing.base_url {
            Some(url) => {
                validate_http_url(url)?;
            }
            None => {
                return Err(ConfigError::Invalid(
                    "publishing.base_url is required".to_string(),
                ));
            }
        }

        if let Some(url) = &self.generation.base_url {
            validate_http_url(url)?;
        }

        if self.notifications.enabled {
            let url = self.notifications.webhook_url.as_deref().ok_or_else(|| {
                ConfigError::Invalid(
                    "notifications.enabled requires notifications.webhook_url".to_string(),
                )
            })?;
            validate_http_url(url)?;
        }

        Ok(())
    }

    /// Custom tags must not repeat each other or any tag the composer adds itself.
    fn validate_custom_hashtags(&self) -> Result<(), ConfigError> {
        let genre_tags: Vec<String> = ContentType::ALL
            .iter()
            .flat_map(|content_type| &self.content_generation.for_type(*content_type).genres)
            .map(|genre| genre_tag(genre))
            .collect();

        let custom = &self.captions.custom_hashtags;
        for (index, tag) in custom.iter().enumerate() {
            if custom[..index].contains(tag) {
                return Err(ConfigError::Invalid(format!(
                    "captions.custom_hashtags lists '{tag}' more than once"
                )));
            }
            if AI_ART_TAGS.contains(&tag.as_str()) || genre_tags.contains(tag) {
                return Err(ConfigError::Invalid(format!(
                    "captions.custom_hashtags '{tag}' is already added to every caption"
                )));
            }
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            provider = ?self.generation.provider,
            posts_enabled = self.content_generation.posts.enabled,
            stories_enabled = self.content_generation.stories.enabled,
            daily_runs = self.scheduling.daily_runs.len(),
            hashtag_style = %self.captions.hashtag_style,
            "Loaded config"
        );
        debug!(?self, "Config loaded (full debug)");
    }
}

/// Reads and validates the YAML config file.
///
/// Runs before logging is installed, so failures are only reported through
/// the returned error.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref).map_err(|err| ConfigError::Read {
        path: path_ref.display().to_string(),
        message: err.to_string(),
    })?;

    AppConfig::from_yaml_str(&content).with_context(|| format!("loading {}", path_ref.display()))
}

/// Account login for the publishing service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Secrets read from the environment at startup.
#[derive(Clone)]
pub struct Secrets {
    pub generation_api_key: String,
    pub publishing: Credentials,
}

impl Secrets {
    pub fn from_env(provider: ProviderKind) -> Result<Self, ConfigError> {
        Self::from_lookup(provider, |name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(provider: ProviderKind, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingCredential(name))
        };
        let generation_api_key = require(provider.api_key_env())?;
        let username = require("INSTAGRAM_USERNAME")?;
        let password = require("INSTAGRAM_PASSWORD")?;
        info!(
            api_key_env = provider.api_key_env(),
            username = %username,
            "Credentials found in env"
        );
        Ok(Self {
            generation_api_key,
            publishing: Credentials { username, password },
        })
    }
}
