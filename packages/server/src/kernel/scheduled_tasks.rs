//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! The knowledge base sync runs on a fixed calendar cadence, fully independent
//! of the event queue. Each cron match invokes the sync handler exactly once;
//! a failed firing is logged and the next firing is the recovery point.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (00:00 UTC, Mon-Fri)
//!     │
//!     └─► SyncTrigger::fire()
//!             └─► SyncHandler::sync()  (1 + SYNC_RETRY_ATTEMPTS attempts,
//!                                        SYNC_TIMEOUT each)
//! ```

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::kernel::SyncHandler;

/// Retries after a failed sync firing.
pub const SYNC_RETRY_ATTEMPTS: u32 = 0;

/// Wall-clock budget for one sync attempt. Running over counts as a failure.
pub const SYNC_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Minute 0, hour 0 (UTC), Monday through Friday.
pub const SYNC_SCHEDULE: CronSpec = CronSpec {
    minute: 0,
    hour: 0,
    weekdays: &[
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ],
};

// =============================================================================
// Cron spec
// =============================================================================

/// Minute/hour/day-of-week recurrence, evaluated in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSpec {
    pub minute: u32,
    pub hour: u32,
    pub weekdays: &'static [Weekday],
}

impl CronSpec {
    /// True when `instant` falls inside a matching minute.
    pub fn matches(&self, instant: DateTime<Utc>) -> bool {
        instant.minute() == self.minute
            && instant.hour() == self.hour
            && self.weekdays.contains(&instant.weekday())
    }

    /// First firing strictly after `after`. `None` when no weekday is set or
    /// the time fields are out of range.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let time = NaiveTime::from_hms_opt(self.hour, self.minute, 0)?;
        let start = after.date_naive();

        (0..=7)
            .filter_map(|offset| start.checked_add_signed(Duration::days(offset)))
            .filter(|date| self.weekdays.contains(&date.weekday()))
            .map(|date| Utc.from_utc_datetime(&date.and_time(time)))
            .find(|candidate| *candidate > after)
    }

    /// Six-field (seconds first) expression for tokio-cron-scheduler.
    pub fn to_expression(&self) -> String {
        let days = self
            .weekdays
            .iter()
            .map(|day| day.to_string().to_uppercase())
            .collect::<Vec<_>>()
            .join(",");
        format!("0 {} {} * * {}", self.minute, self.hour, days)
    }
}

// =============================================================================
// Trigger
// =============================================================================

/// Result of one scheduler firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiringOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: String },
}

impl FiringOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FiringOutcome::Succeeded { .. })
    }
}

/// Invokes the sync handler for a single firing. Carries no payload and no
/// state between firings.
pub struct SyncTrigger {
    handler: Arc<dyn SyncHandler>,
    retry_attempts: u32,
    timeout: std::time::Duration,
}

impl SyncTrigger {
    pub fn new(handler: Arc<dyn SyncHandler>) -> Self {
        Self {
            handler,
            retry_attempts: SYNC_RETRY_ATTEMPTS,
            timeout: SYNC_TIMEOUT,
        }
    }

    /// Run one firing. Failures are logged, never propagated.
    pub async fn fire(&self) -> FiringOutcome {
        let max_attempts = 1 + self.retry_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match tokio::time::timeout(self.timeout, self.handler.sync()).await {
                Ok(Ok(())) => {
                    info!(attempt, "knowledge base sync completed");
                    return FiringOutcome::Succeeded { attempts: attempt };
                }
                Ok(Err(e)) => {
                    warn!(attempt, max_attempts, error = %e, "knowledge base sync attempt failed");
                    last_error = format!("{:#}", e);
                }
                Err(_) => {
                    warn!(
                        attempt,
                        max_attempts,
                        timeout_secs = self.timeout.as_secs(),
                        "knowledge base sync attempt timed out"
                    );
                    last_error = format!("timed out after {:?}", self.timeout);
                }
            }
        }

        error!(
            attempts = max_attempts,
            error = %last_error,
            "knowledge base sync failed, waiting for next firing"
        );
        FiringOutcome::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }
}

/// Start all scheduled tasks
pub async fn start_scheduler(trigger: Arc<SyncTrigger>, schedule: CronSpec) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let expression = schedule.to_expression();
    let sync_job = Job::new_async(expression.as_str(), move |_uuid, _lock| {
        let trigger = trigger.clone();
        Box::pin(async move {
            trigger.fire().await;
        })
    })?;

    scheduler.add(sync_job).await?;
    scheduler.start().await?;

    tracing::info!(
        schedule = %expression,
        next_run = ?schedule.next_after(Utc::now()),
        "Scheduled tasks started (knowledge base sync)"
    );
    Ok(scheduler)
}
