//! Daily trigger loop.
//!
//! Every enabled schedule entry becomes one [`Trigger`] per content type it
//! applies to (skipping content types whose generation is disabled). Each
//! trigger remembers its next due local time; the loop wakes every poll
//! interval, fires what is due, and pushes those triggers to their next
//! occurrence. Missed times are never backfilled.

use std::future::Future;
use std::time::Duration;

use chrono::{Days, Local, NaiveDateTime, NaiveTime};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, ScheduleEntry};
use crate::content::ContentType;
use crate::error::ConfigError;
use crate::pipeline::{ContentRunner, RunFailure};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("fatal failure during {content_type} run: {failure}")]
    Fatal {
        content_type: ContentType,
        failure: RunFailure,
    },
}

/// First occurrence of `time` strictly after `now`.
pub fn next_occurrence(time: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(time);
    if today > now {
        return today;
    }
    now.date()
        .checked_add_days(Days::new(1))
        .map(|tomorrow| tomorrow.and_time(time))
        .unwrap_or(NaiveDateTime::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub time: NaiveTime,
    pub content_type: ContentType,
    pub next_run: NaiveDateTime,
}

impl Trigger {
    pub fn new(time: NaiveTime, content_type: ContentType, now: NaiveDateTime) -> Self {
        Self {
            time,
            content_type,
            next_run: next_occurrence(time, now),
        }
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now >= self.next_run
    }

    pub fn advance(&mut self, now: NaiveDateTime) {
        self.next_run = next_occurrence(self.time, now);
    }
}

#[derive(Debug)]
pub struct Scheduler {
    triggers: Vec<Trigger>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(triggers: Vec<Trigger>, poll_interval: Duration) -> Self {
        Self {
            triggers,
            poll_interval,
        }
    }

    /// Registers triggers for every enabled entry, relative to `now`.
    pub fn from_entries(
        entries: &[ScheduleEntry],
        is_enabled: impl Fn(ContentType) -> bool,
        poll_interval: Duration,
        now: NaiveDateTime,
    ) -> Self {
        let mut triggers = Vec::new();
        for entry in entries.iter().filter(|entry| entry.enabled) {
            for &content_type in entry.applies_to.content_types() {
                if !is_enabled(content_type) {
                    debug!(
                        content_type = %content_type,
                        time = %entry.trigger_time,
                        "Skipping trigger for disabled content type"
                    );
                    continue;
                }
                let trigger = Trigger::new(entry.trigger_time, content_type, now);
                info!(
                    content_type = %content_type,
                    time = %entry.trigger_time.format("%H:%M"),
                    next_run = %trigger.next_run,
                    "Registered daily trigger"
                );
                triggers.push(trigger);
            }
        }
        Self::new(triggers, poll_interval)
    }

    pub fn from_config(config: &AppConfig, now: NaiveDateTime) -> Result<Self, ConfigError> {
        let entries = config.scheduling.entries()?;
        let generation = &config.content_generation;
        Ok(Self::from_entries(
            &entries,
            |content_type| generation.for_type(content_type).enabled,
            config.scheduling.poll_interval(),
            now,
        ))
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.triggers.iter().map(|trigger| trigger.next_run).min()
    }

    /// Fires every trigger due at `now`, in registration order. Returns how many fired.
    pub async fn tick<Rn>(&mut self, runner: &mut Rn, now: NaiveDateTime) -> Result<usize, SchedulerError>
    where
        Rn: ContentRunner + ?Sized,
    {
        let mut fired = 0;
        for trigger in self.triggers.iter_mut().filter(|trigger| trigger.is_due(now)) {
            let content_type = trigger.content_type;
            trigger.advance(now);
            fired += 1;
            info!(content_type = %content_type, "Scheduled run starting");

            if runner.run(content_type).await {
                info!(content_type = %content_type, "Scheduled run succeeded");
                continue;
            }
            match runner.last_failure() {
                Some(failure) if failure.is_fatal() => {
                    error!(
                        content_type = %content_type,
                        error_kind = failure.kind(),
                        "Fatal failure, stopping scheduler"
                    );
                    return Err(SchedulerError::Fatal {
                        content_type,
                        failure,
                    });
                }
                failure => {
                    warn!(
                        content_type = %content_type,
                        error_kind = failure.as_ref().map(RunFailure::kind).unwrap_or("unknown"),
                        "Scheduled run failed"
                    );
                }
            }
        }
        Ok(fired)
    }

    /// Polls until `shutdown` resolves or a fatal failure occurs.
    pub async fn run<Rn, F>(&mut self, runner: &mut Rn, shutdown: F) -> Result<(), SchedulerError>
    where
        Rn: ContentRunner + ?Sized,
        F: Future<Output = ()>,
    {
        info!(
            triggers = self.triggers.len(),
            poll_interval_secs = self.poll_interval.as_secs(),
            "Scheduler started"
        );
        if self.triggers.is_empty() {
            warn!("No enabled schedule entries; the scheduler will idle");
        }
        tokio::pin!(shutdown);

        loop {
            self.tick(runner, Local::now().naive_local()).await?;
            debug!(next_due = ?self.next_due(), "Waiting for next trigger");
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, scheduler stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
