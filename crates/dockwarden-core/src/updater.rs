//! Digest-based update detection and in-place recreation.
//!
//! One [`Updater::run`] invocation is a cycle: list, filter, then fan out
//! per-container workers under a concurrency bound. A worker failure is a
//! per-container result, never a cycle abort. Within one container the
//! pipeline is strictly sequential: digest → pull → digest → recreate →
//! image cleanup → health reset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dockwarden_engine::{ContainerSnapshot, DynEngine, EngineError, ListOptions};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::event::{Event, Notifier};
use crate::filter::FilterPolicy;
use crate::health::HealthWatcher;

/// Concurrent per-container workers per cycle. Rolling restart lowers this
/// to one.
const DEFAULT_CONCURRENCY: usize = 5;

/// Outcome of one container's update step.
#[derive(Debug)]
pub struct UpdateResult {
    /// Container id at the start of the step.
    pub container_id: String,
    /// Container name.
    pub container_name: String,
    /// Image id the container ran before the step.
    pub old_image_id: String,
    /// Image id after a successful recreate.
    pub new_image_id: Option<String>,
    /// Whether the container was recreated on a new image.
    pub updated: bool,
    /// Failure description, when the step failed.
    pub error: Option<String>,
}

/// Counts for one finished cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleSummary {
    /// Containers recreated.
    pub updated: usize,
    /// Containers whose step failed.
    pub failed: usize,
}

/// Monotonic cross-cycle counters.
#[derive(Debug, Default)]
pub struct CycleStats {
    total_updated: AtomicU64,
    total_failed: AtomicU64,
    last_run: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl CycleStats {
    /// Containers updated across all cycles.
    pub fn total_updated(&self) -> u64 {
        self.total_updated.load(Ordering::Relaxed)
    }

    /// Failed update steps across all cycles.
    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    /// Start time of the most recent cycle.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run.lock().ok().and_then(|guard| *guard)
    }

    fn record(&self, summary: CycleSummary, started: DateTime<Utc>) {
        self.total_updated
            .fetch_add(summary.updated as u64, Ordering::Relaxed);
        self.total_failed
            .fetch_add(summary.failed as u64, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_run.lock() {
            *guard = Some(started);
        }
    }
}

/// Runs update cycles against the engine.
pub struct Updater {
    engine: DynEngine,
    config: Arc<Config>,
    filter: FilterPolicy,
    notifier: Arc<Notifier>,
    health: Option<Arc<HealthWatcher>>,
    stats: CycleStats,
}

impl Updater {
    /// Creates an updater. `health` links successful recreates to the
    /// watcher's per-container reset.
    #[must_use]
    pub fn new(
        engine: DynEngine,
        config: Arc<Config>,
        filter: FilterPolicy,
        notifier: Arc<Notifier>,
        health: Option<Arc<HealthWatcher>>,
    ) -> Self {
        Self {
            engine,
            config,
            filter,
            notifier,
            health,
            stats: CycleStats::default(),
        }
    }

    /// Cross-cycle statistics.
    pub const fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Runs one update cycle.
    ///
    /// # Errors
    ///
    /// Returns an error only when the initial container listing fails;
    /// everything past that point degrades to per-container results.
    pub async fn run(self: Arc<Self>) -> Result<CycleSummary, EngineError> {
        let started = Utc::now();
        info!("starting update check");

        let snapshots = self
            .engine
            .list(ListOptions {
                include_stopped: self.config.include_stopped,
                label_filter: None,
            })
            .await?;
        let total = snapshots.len();

        let targets: Vec<_> = self
            .filter
            .apply(snapshots)
            .into_iter()
            .filter(|snapshot| {
                if snapshot.update_enabled() {
                    true
                } else {
                    debug!(container = %snapshot.name, "updates disabled, skipping");
                    false
                }
            })
            .collect();
        debug!(candidates = targets.len(), total, "filtered containers");

        if targets.is_empty() {
            info!("no containers to update");
            let summary = CycleSummary {
                updated: 0,
                failed: 0,
            };
            self.stats.record(summary, started);
            return Ok(summary);
        }

        if self.notifier.enabled() {
            self.notifier.send(Event::cycle_start()).await;
        }

        let limit = if self.config.rolling_restart {
            1
        } else {
            DEFAULT_CONCURRENCY
        };
        let semaphore = Arc::new(Semaphore::new(limit));

        let mut tasks = JoinSet::new();
        for snapshot in targets {
            let updater = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                updater.process_container(snapshot).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => error!(error = %err, "update worker panicked"),
            }
        }

        let mut updated = 0;
        let mut failed = 0;
        for result in &results {
            if let Some(error) = &result.error {
                error!(container = %result.container_name, error = %error, "failed to process container");
                failed += 1;
            } else if result.updated {
                info!(container = %result.container_name, "updated container");
                updated += 1;
            }
        }

        let summary = CycleSummary { updated, failed };
        self.stats.record(summary, started);

        if self.notifier.enabled() {
            self.notifier.send(Event::cycle_end(updated, failed)).await;
        }

        let took = Utc::now().signed_duration_since(started);
        info!(updated, failed, took_ms = took.num_milliseconds(), "update check complete");
        Ok(summary)
    }

    /// The per-container update protocol.
    async fn process_container(&self, snapshot: ContainerSnapshot) -> UpdateResult {
        let mut result = UpdateResult {
            container_id: snapshot.id.clone(),
            container_name: snapshot.name.clone(),
            old_image_id: snapshot.image_id.clone(),
            new_image_id: None,
            updated: false,
            error: None,
        };

        let digests = match self.check_for_update(&snapshot).await {
            Ok(digests) => digests,
            Err(err) => {
                result.error = Some(format!("failed to check for updates: {err}"));
                return result;
            }
        };
        let Some((old_digest, new_digest)) = digests else {
            debug!(container = %snapshot.name, "container is up to date");
            return result;
        };

        if self.config.monitor_only() {
            info!(container = %snapshot.name, "update available (monitor only, not applied)");
            return result;
        }
        if self.config.no_restart {
            info!(container = %snapshot.name, "update pulled, recreate suppressed by no-restart");
            return result;
        }

        if let Err(err) = self.update_container(&snapshot, &mut result).await {
            result.error = Some(format!("failed to update: {err}"));
            return result;
        }
        result.updated = true;

        self.notifier
            .send(Event::container_updated(
                &snapshot.name,
                snapshot.image.as_str(),
                &old_digest,
                &new_digest,
            ))
            .await;

        result
    }

    /// Pull-and-compare. `Some((old, new))` means an update is available.
    async fn check_for_update(
        &self,
        snapshot: &ContainerSnapshot,
    ) -> Result<Option<(String, String)>, EngineError> {
        if self.config.no_pull {
            return Ok(None);
        }
        if snapshot.image.pinned() {
            debug!(container = %snapshot.name, image = %snapshot.image, "image reference is pinned, skipping pull");
            return Ok(None);
        }

        let current = self.engine.image_digest(&snapshot.image).await?;
        self.engine.pull(&snapshot.image).await?;
        let new = self.engine.image_digest(&snapshot.image).await?;

        if current == new {
            Ok(None)
        } else {
            debug!(container = %snapshot.name, old = %current, new = %new, "image digest changed");
            Ok(Some((current, new)))
        }
    }

    /// Recreate plus the post-recreate steps: image cleanup and health reset.
    async fn update_container(
        &self,
        snapshot: &ContainerSnapshot,
        result: &mut UpdateResult,
    ) -> Result<(), EngineError> {
        let timeout = snapshot.stop_timeout(self.config.stop_timeout());
        info!(container = %snapshot.name, "updating container");

        let new_id = self.engine.recreate(&snapshot.id, timeout).await?;

        if self.config.cleanup && !snapshot.image_id.is_empty() {
            if let Err(err) = self.engine.remove_image(&snapshot.image_id).await {
                debug!(
                    container = %snapshot.name,
                    error = %err,
                    "failed to remove old image"
                );
            }
        }

        if let Some(health) = &self.health {
            health.reset_container(&snapshot.id).await;
        }

        if let Ok(new_snapshot) = self.engine.inspect(&new_id).await {
            result.new_image_id = Some(new_snapshot.image_id);
        }

        Ok(())
    }
}
