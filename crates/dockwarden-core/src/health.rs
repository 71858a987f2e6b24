//! Container health watching with bounded retry.
//!
//! Each container id gets a retry state machine: *Nominal* →
//! *Degraded(attempts)* → *GaveUp*. Give-up blocks further restarts of a
//! bad image version; observing a new image id for the same id is the only
//! way out, so a fixed image resumes automatically.
//!
//! Entries are created lazily and never evicted. An entry whose container
//! is gone simply goes cold; it cannot interfere with anything.

use std::collections::HashMap;
use std::sync::Arc;

use dockwarden_engine::{ContainerSnapshot, DynEngine, ListOptions};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{Config, HealthAction};
use crate::event::{Event, Notifier};

/// Restart attempts before the watcher gives up on a container version.
pub const MAX_RESTART_ATTEMPTS: u32 = 5;

/// Per-container retry state. The entry mutex serializes tick processing
/// against external resets.
#[derive(Debug, Default)]
struct EntryState {
    restart_attempts: u32,
    gave_up: bool,
    last_image_id: String,
}

/// Health monitoring statistics.
#[derive(Debug, Clone, Copy)]
pub struct WatcherStats {
    /// Container ids ever observed by the watcher.
    pub monitored_containers: usize,
    /// Entries currently in the give-up state.
    pub gave_up_containers: usize,
    /// The retry bound.
    pub max_restart_attempts: u32,
}

/// Observes per-container health and restarts unhealthy containers with
/// bounded retry.
pub struct HealthWatcher {
    engine: DynEngine,
    config: Arc<Config>,
    notifier: Arc<Notifier>,
    states: RwLock<HashMap<String, Arc<Mutex<EntryState>>>>,
}

impl HealthWatcher {
    /// Creates a watcher; call [`HealthWatcher::run`] to start ticking.
    #[must_use]
    pub fn new(engine: DynEngine, config: Arc<Config>, notifier: Arc<Notifier>) -> Self {
        Self {
            engine,
            config,
            notifier,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Runs the tick loop until `shutdown` fires. An in-flight tick is
    /// permitted to complete.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.health_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("health watcher started");
        loop {
            tokio::select! {
                _ = ticker.tick() => Arc::clone(&self).tick().await,
                _ = shutdown.recv() => break,
            }
        }
        info!("health watcher stopped");
    }

    /// Runs one tick: list running containers with health, drop unwatched
    /// ones, and step every surviving container's state machine in parallel.
    pub async fn tick(self: Arc<Self>) {
        let snapshots = match self.engine.list(ListOptions::default()).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                // Never terminate on engine errors; the next tick retries.
                error!(error = %err, "failed to list containers for health check");
                return;
            }
        };

        let mut tasks = JoinSet::new();
        for snapshot in snapshots {
            if !snapshot.watch_enabled() {
                continue;
            }
            if let Some(scope) = self.config.scope.as_deref() {
                if !scope.is_empty() && snapshot.scope() != scope {
                    continue;
                }
            }
            if self.config.label_enable && !snapshot.enabled(&self.config.label_name, false) {
                continue;
            }

            let watcher = Arc::clone(&self);
            tasks.spawn(async move { watcher.process(snapshot).await });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// One state-machine step for one container, under its entry lock.
    async fn process(&self, snapshot: ContainerSnapshot) {
        let entry = self.entry(&snapshot.id).await;
        let mut state = entry.lock().await;

        // Version reset: a new image id clears retry history, including
        // give-up. This is the only exit from the give-up state.
        if !state.last_image_id.is_empty() && state.last_image_id != snapshot.image_id {
            info!(container = %snapshot.name, "new image observed, resetting health tracking");
            state.restart_attempts = 0;
            state.gave_up = false;
        }
        state.last_image_id = snapshot.image_id.clone();

        if state.gave_up {
            debug!(
                container = %snapshot.name,
                attempts = MAX_RESTART_ATTEMPTS,
                "gave up on this version, waiting for a new image"
            );
            return;
        }

        if snapshot.is_unhealthy() {
            self.handle_unhealthy(&snapshot, &mut state).await;
        } else if snapshot.is_healthy() && state.restart_attempts > 0 {
            info!(
                container = %snapshot.name,
                restarts = state.restart_attempts,
                "container recovered"
            );
            state.restart_attempts = 0;
        }
    }

    async fn handle_unhealthy(&self, snapshot: &ContainerSnapshot, state: &mut EntryState) {
        warn!(
            container = %snapshot.name,
            attempt = state.restart_attempts + 1,
            max = MAX_RESTART_ATTEMPTS,
            "container is unhealthy"
        );

        if state.restart_attempts >= MAX_RESTART_ATTEMPTS {
            error!(
                container = %snapshot.name,
                attempts = MAX_RESTART_ATTEMPTS,
                "giving up; restarts resume when a new image version appears"
            );
            state.gave_up = true;
            self.notifier
                .send(Event::container_gave_up(
                    &snapshot.name,
                    snapshot.image.as_str(),
                    MAX_RESTART_ATTEMPTS,
                ))
                .await;
            return;
        }

        // Per-container label override wins over the global action.
        let action = snapshot
            .watch_action()
            .and_then(HealthAction::parse)
            .unwrap_or_else(|| self.config.effective_health_action());

        state.restart_attempts += 1;
        self.notifier
            .send(Event::container_unhealthy(
                &snapshot.name,
                snapshot.image.as_str(),
                state.restart_attempts,
            ))
            .await;

        if action == HealthAction::Restart {
            info!(
                container = %snapshot.name,
                attempt = state.restart_attempts,
                max = MAX_RESTART_ATTEMPTS,
                "restarting unhealthy container"
            );
            let timeout = snapshot.stop_timeout(self.config.stop_timeout());
            match self.engine.restart(&snapshot.id, timeout).await {
                Ok(()) => {
                    self.notifier
                        .send(Event::container_restarted(
                            &snapshot.name,
                            snapshot.image.as_str(),
                            state.restart_attempts,
                        ))
                        .await;
                }
                Err(err) => {
                    error!(
                        container = %snapshot.name,
                        error = %err,
                        "failed to restart unhealthy container"
                    );
                }
            }
        }
    }

    async fn entry(&self, id: &str) -> Arc<Mutex<EntryState>> {
        if let Some(entry) = self.states.read().await.get(id) {
            return Arc::clone(entry);
        }
        let mut states = self.states.write().await;
        Arc::clone(states.entry(id.to_string()).or_default())
    }

    /// Resets tracking for a container id. Called by the updater after an
    /// identity-preserving recreate.
    pub async fn reset_container(&self, id: &str) {
        let entry = self.states.read().await.get(id).cloned();
        if let Some(entry) = entry {
            let mut state = entry.lock().await;
            state.restart_attempts = 0;
            state.gave_up = false;
            state.last_image_id.clear();
        }
    }

    /// Current monitoring statistics.
    pub async fn stats(&self) -> WatcherStats {
        let states = self.states.read().await;
        let mut gave_up = 0;
        for entry in states.values() {
            if entry.lock().await.gave_up {
                gave_up += 1;
            }
        }
        WatcherStats {
            monitored_containers: states.len(),
            gave_up_containers: gave_up,
            max_restart_attempts: MAX_RESTART_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{snapshot, MockEngine};
    use dockwarden_engine::{HealthState, LABEL_WATCH_ACTION, LABEL_WATCH_ENABLE};

    fn watcher(engine: &Arc<MockEngine>, config: Config) -> Arc<HealthWatcher> {
        let engine: DynEngine = Arc::clone(engine) as DynEngine;
        Arc::new(HealthWatcher::new(
            engine,
            Arc::new(config),
            Arc::new(Notifier::new(None)),
        ))
    }

    fn unhealthy(id: &str, name: &str, image_id: &str) -> ContainerSnapshot {
        let mut snap = snapshot(id, name, "worker:latest", image_id);
        snap.health = HealthState::Unhealthy;
        snap
    }

    #[tokio::test]
    async fn restarts_then_gives_up_then_resumes_on_new_image() {
        let engine = MockEngine::new(vec![unhealthy("c1", "worker", "sha256:w")]);
        let watcher = watcher(&engine, Config::default());

        // Five ticks restart; counting continues to the bound.
        for expected in 1..=5 {
            Arc::clone(&watcher).tick().await;
            assert_eq!(engine.call_count("restart"), expected);
        }

        // Sixth unhealthy observation gives up without restarting.
        Arc::clone(&watcher).tick().await;
        assert_eq!(engine.call_count("restart"), 5);
        let stats = watcher.stats().await;
        assert_eq!(stats.gave_up_containers, 1);
        assert_eq!(stats.monitored_containers, 1);

        // Still gave up on further ticks.
        Arc::clone(&watcher).tick().await;
        assert_eq!(engine.call_count("restart"), 5);

        // Operator ships a fix: new image id resets the machine, and an
        // unhealthy container starts a fresh cycle at attempt 1.
        engine.set_containers(vec![unhealthy("c1", "worker", "sha256:w2")]);
        Arc::clone(&watcher).tick().await;
        assert_eq!(engine.call_count("restart"), 6);
        assert_eq!(watcher.stats().await.gave_up_containers, 0);
    }

    #[tokio::test]
    async fn healthy_container_resets_attempts() {
        let engine = MockEngine::new(vec![unhealthy("c1", "worker", "sha256:w")]);
        let watcher = watcher(&engine, Config::default());

        Arc::clone(&watcher).tick().await;
        assert_eq!(engine.call_count("restart"), 1);

        let mut healthy = snapshot("c1", "worker", "worker:latest", "sha256:w");
        healthy.health = HealthState::Healthy;
        engine.set_containers(vec![healthy]);
        Arc::clone(&watcher).tick().await;

        // Back to unhealthy: the count starts over rather than resuming.
        engine.set_containers(vec![unhealthy("c1", "worker", "sha256:w")]);
        for _ in 0..5 {
            Arc::clone(&watcher).tick().await;
        }
        assert_eq!(engine.call_count("restart"), 6);
        assert_eq!(watcher.stats().await.gave_up_containers, 0);
    }

    #[tokio::test]
    async fn notify_action_skips_restart() {
        let config = Config {
            health_action: HealthAction::Notify,
            ..Default::default()
        };
        let engine = MockEngine::new(vec![unhealthy("c1", "worker", "sha256:w")]);
        let watcher = watcher(&engine, config);

        Arc::clone(&watcher).tick().await;
        Arc::clone(&watcher).tick().await;
        assert_eq!(engine.call_count("restart"), 0);
    }

    #[tokio::test]
    async fn label_action_overrides_global() {
        let engine = MockEngine::new(vec![{
            let mut snap = unhealthy("c1", "worker", "sha256:w");
            snap.labels
                .insert(LABEL_WATCH_ACTION.to_string(), "notify".to_string());
            snap
        }]);
        let watcher = watcher(&engine, Config::default());

        Arc::clone(&watcher).tick().await;
        assert_eq!(engine.call_count("restart"), 0);
    }

    #[tokio::test]
    async fn unwatched_containers_are_skipped() {
        let engine = MockEngine::new(vec![{
            let mut snap = unhealthy("c1", "worker", "sha256:w");
            snap.labels
                .insert(LABEL_WATCH_ENABLE.to_string(), "false".to_string());
            snap
        }]);
        let watcher = watcher(&engine, Config::default());

        Arc::clone(&watcher).tick().await;
        assert_eq!(engine.call_count("restart"), 0);
        assert_eq!(watcher.stats().await.monitored_containers, 0);
    }

    #[tokio::test]
    async fn scope_mismatch_is_skipped() {
        let config = Config {
            scope: Some("prod".to_string()),
            ..Default::default()
        };
        let engine = MockEngine::new(vec![unhealthy("c1", "worker", "sha256:w")]);
        let watcher = watcher(&engine, config);

        Arc::clone(&watcher).tick().await;
        assert_eq!(engine.call_count("restart"), 0);
    }

    #[tokio::test]
    async fn reset_container_clears_give_up() {
        let engine = MockEngine::new(vec![unhealthy("c1", "worker", "sha256:w")]);
        let watcher = watcher(&engine, Config::default());

        for _ in 0..6 {
            Arc::clone(&watcher).tick().await;
        }
        assert_eq!(watcher.stats().await.gave_up_containers, 1);

        watcher.reset_container("c1").await;
        assert_eq!(watcher.stats().await.gave_up_containers, 0);

        Arc::clone(&watcher).tick().await;
        assert_eq!(engine.call_count("restart"), 6);
    }

    #[tokio::test]
    async fn engine_errors_do_not_kill_the_watcher() {
        let engine = MockEngine::new(vec![unhealthy("c1", "worker", "sha256:w")]);
        engine.fail_list(true);
        let watcher = watcher(&engine, Config::default());

        Arc::clone(&watcher).tick().await;
        assert_eq!(engine.call_count("restart"), 0);

        engine.fail_list(false);
        Arc::clone(&watcher).tick().await;
        assert_eq!(engine.call_count("restart"), 1);
    }
}
