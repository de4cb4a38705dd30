//! Command-line surface: argument parsing and wiring of the pipeline components.
//!
//! - `schedule` (default): long-running daily trigger loop, stopped with Ctrl-C
//! - `test`: one run of one content type, non-zero exit on failure
//! - `batch`: several items delivered with the retry policy
//!
//! Secrets come from the environment (a `.env` file is honoured by `main`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{error, info, warn};

use crate::archive::Archive;
use crate::config::{AppConfig, Secrets, load_config};
use crate::content::ContentType;
use crate::delivery::{DeliveryAdapter, HttpPublisher};
use crate::generation::generator_from_config;
use crate::notify::WebhookNotifier;
use crate::pipeline::ContentPipeline;
use crate::scheduler::Scheduler;
use crate::telemetry;

#[derive(Debug, Parser)]
#[command(
    name = "ai-post-pipeline",
    version,
    about = "Generate AI artwork and publish it as posts and stories on a daily schedule"
)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(long, global = true, default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the daily scheduler until interrupted
    Schedule,
    /// Generate and publish a single item right now
    Test {
        #[arg(long, default_value = "posts")]
        content_type: ContentType,
    },
    /// Generate several items and deliver them with retries
    Batch {
        #[arg(long)]
        count: usize,
        #[arg(long, default_value = "posts")]
        content_type: ContentType,
    },
}

pub fn build_pipeline(config: AppConfig, secrets: &Secrets) -> Result<ContentPipeline<HttpPublisher>> {
    let generator = generator_from_config(&config.generation, &secrets.generation_api_key)
        .context("building image generator")?;

    let base_url = config
        .publishing
        .base_url
        .as_deref()
        .context("publishing.base_url is required")?;
    let publisher = HttpPublisher::new(
        base_url,
        Duration::from_secs(config.publishing.request_timeout_secs),
    )
    .context("building publishing client")?;
    let delivery = DeliveryAdapter::new(publisher, secrets.publishing.clone());

    let archive = config.archive.enabled.then(|| {
        let dir = config.archive.resolve_dir();
        info!(archive_dir = %dir.display(), "Archiving generated content");
        Archive::new(dir)
    });
    let notifier = WebhookNotifier::from_config(&config.notifications)?;

    let mut pipeline = ContentPipeline::new(config, generator, delivery, StdRng::from_os_rng());
    if let Some(archive) = archive {
        pipeline = pipeline.with_archive(archive);
    }
    if let Some(notifier) = notifier {
        pipeline = pipeline.with_notifier(notifier);
    }
    Ok(pipeline)
}

/// Installs the Ctrl-C handler right away and returns a future that resolves
/// on the signal. The handler is live before the first scheduled run starts.
pub async fn shutdown_signal() -> impl Future<Output = ()> {
    let listener = tokio::spawn(tokio::signal::ctrl_c());
    // let the listener task register the handler before returning
    tokio::task::yield_now().await;
    async move {
        match listener.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(error = %err, "Unable to listen for Ctrl-C; running until killed");
                std::future::pending::<()>().await;
            }
            Err(err) => {
                warn!(error = %err, "Ctrl-C listener stopped; running until killed");
                std::future::pending::<()>().await;
            }
        }
    }
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli.config)?;
    telemetry::init(&config.logging)?;
    info!(config_path = %cli.config.display(), "Loaded configuration from file");
    config.trace_loaded();

    let secrets = Secrets::from_env(config.generation.provider)?;
    let mut pipeline = build_pipeline(config, &secrets)?;

    match cli.command.unwrap_or(Command::Schedule) {
        Command::Schedule => {
            let mut scheduler =
                Scheduler::from_config(pipeline.config(), Local::now().naive_local())?;
            let shutdown = shutdown_signal().await;
            scheduler.run(&mut pipeline, shutdown).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Test { content_type } => {
            info!(content_type = %content_type, "Running single test run");
            if pipeline.run(content_type).await {
                info!(content_type = %content_type, "Test run succeeded");
                Ok(ExitCode::SUCCESS)
            } else {
                error!(
                    content_type = %content_type,
                    error_kind = pipeline.last_failure().map(|f| f.kind()).unwrap_or("unknown"),
                    "Test run failed"
                );
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Batch {
            count,
            content_type,
        } => match pipeline.run_batch(content_type, count).await {
            Ok(report) => {
                info!(
                    content_type = %content_type,
                    requested = report.requested,
                    delivered = report.delivered(),
                    "Batch finished"
                );
                Ok(if report.all_delivered() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                })
            }
            Err(failure) => {
                error!(
                    content_type = %content_type,
                    error_kind = failure.kind(),
                    "Batch aborted"
                );
                Ok(ExitCode::FAILURE)
            }
        },
    }
}
