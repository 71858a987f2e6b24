//! Fires the update cycle at a fixed interval or on a cron schedule.
//!
//! The two cadences are alternatives, not layers: an interval fires
//! relative to startup, a cron expression defines absolute fire times. When
//! both are configured the cron schedule wins. Stopping is cooperative: a
//! tick that is already executing runs to completion.

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use dockwarden_error::CommonError;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::Config;

/// When the scheduler fires.
#[derive(Debug, Clone)]
pub enum Cadence {
    /// Fire immediately, then every interval.
    Interval(Duration),
    /// Fire at the expression's times (seconds granularity).
    Cron(Box<cron::Schedule>),
}

impl Cadence {
    /// Derives the cadence from configuration. A configured cron schedule
    /// takes precedence over the interval.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid cron expression.
    pub fn from_config(config: &Config) -> Result<Self, CommonError> {
        if let Some(schedule) = &config.schedule {
            let schedule = cron::Schedule::from_str(schedule)
                .map_err(|e| CommonError::config(format!("invalid cron schedule: {e}")))?;
            return Ok(Self::Cron(Box::new(schedule)));
        }
        Ok(Self::Interval(config.interval()))
    }

    /// Time until the next cron fire, `None` for interval cadences or an
    /// exhausted schedule.
    fn next_cron_delay(&self) -> Option<Duration> {
        let Self::Cron(schedule) = self else {
            return None;
        };
        let next = schedule.upcoming(Utc).next()?;
        (next - Utc::now()).to_std().ok()
    }
}

/// Drives a repeated action until shutdown.
pub struct Scheduler {
    cadence: Cadence,
}

impl Scheduler {
    /// Creates a scheduler with the given cadence.
    #[must_use]
    pub const fn new(cadence: Cadence) -> Self {
        Self { cadence }
    }

    /// Runs `action` per the cadence until `shutdown` fires. The in-flight
    /// action completes before this returns.
    pub async fn run<F, Fut>(&self, mut shutdown: broadcast::Receiver<()>, mut action: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        match &self.cadence {
            Cadence::Interval(interval) => {
                info!(interval_secs = interval.as_secs(), "scheduling updates on an interval");
                let mut ticker = tokio::time::interval(*interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        // The first tick fires immediately.
                        _ = ticker.tick() => action().await,
                        _ = shutdown.recv() => break,
                    }
                }
            }
            Cadence::Cron(_) => {
                info!("scheduling updates on a cron schedule");
                loop {
                    let Some(delay) = self.cadence.next_cron_delay() else {
                        info!("cron schedule has no upcoming fire times");
                        return;
                    };
                    tokio::select! {
                        () = tokio::time::sleep(delay) => action().await,
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }
        info!("scheduler stopped");
    }
}
