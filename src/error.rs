//! Error taxonomy for the pipeline.
//!
//! Each stage has its own error type so the orchestrator can tell a
//! recoverable per-run failure apart from one that must stop the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("decode image failed: {0}")]
    Decode(String),
    #[error("invalid target dimensions {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },
    #[error("encode image failed: {0}")]
    Encode(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptionError {
    #[error("genre '{genre}' is not configured (available: {available})")]
    InvalidGenre { genre: String, available: String },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(String),
    #[error("provider rejected the request: {status} {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("generation task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },
    #[error("generation timed out after {polls} polls (task_id={task_id})")]
    Timeout { task_id: String, polls: u32 },
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Request(err.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("credentials rejected: {0}")]
    CredentialsInvalid(String),
    /// The service wants an out-of-band verification step. Never retried.
    #[error("challenge required: {0}")]
    ChallengeRequired(String),
    #[error("authentication transport failure: {0}")]
    Transport(String),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::CredentialsInvalid(_) => "credentials_invalid",
            AuthError::ChallengeRequired(_) => "challenge_required",
            AuthError::Transport(_) => "auth_transport",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("session expired: {0}")]
    SessionExpired(String),
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("upload transport failure: {0}")]
    Transport(String),
    #[error("re-authentication failed: {0}")]
    Reauthentication(AuthError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("required credential {0} is not set")]
    MissingCredential(&'static str),
}
