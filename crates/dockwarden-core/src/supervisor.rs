//! Wires the control loops together and owns shutdown.
//!
//! The supervisor enforces single-flight of the update cycle: overlapping
//! cycles would pull twice and race on recreate, so a tick arriving while a
//! cycle runs is dropped. Shutdown stops the scheduler first, then the
//! health watcher, and waits for both to quiesce; in-flight container
//! operations complete rather than being cancelled, so a container is never
//! left removed-but-not-created by the warden's own exit.

use std::sync::Arc;

use dockwarden_engine::DynEngine;
use dockwarden_error::CommonError;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::event::Notifier;
use crate::filter::{FilterPolicy, SelfIdentity};
use crate::health::HealthWatcher;
use crate::scheduler::{Cadence, Scheduler};
use crate::updater::Updater;

/// Wires engine, updater, health watcher, scheduler, and notifier.
pub struct Supervisor {
    config: Arc<Config>,
    updater: Arc<Updater>,
    watcher: Option<Arc<HealthWatcher>>,
    cycle_gate: tokio::sync::Mutex<()>,
}

impl Supervisor {
    /// Builds the component graph from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when validation fails.
    pub fn new(engine: DynEngine, config: Config) -> Result<Self, CommonError> {
        config.validate()?;
        let config = Arc::new(config);

        let notifier = Arc::new(Notifier::new(config.notification_url.clone()));

        let watcher = if config.watch_loop_enabled() {
            Some(Arc::new(HealthWatcher::new(
                Arc::clone(&engine),
                Arc::clone(&config),
                Arc::clone(&notifier),
            )))
        } else {
            None
        };

        let self_identity = SelfIdentity::detect(config.self_name.clone());
        let filter = FilterPolicy::from_config(&config, self_identity);
        let updater = Arc::new(Updater::new(
            engine,
            Arc::clone(&config),
            filter,
            notifier,
            watcher.clone(),
        ));

        Ok(Self {
            config,
            updater,
            watcher,
            cycle_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// The updater, for stats inspection.
    #[must_use]
    pub const fn updater(&self) -> &Arc<Updater> {
        &self.updater
    }

    /// Runs until `shutdown` fires (or immediately after one cycle in
    /// run-once mode).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the cadence cannot be derived.
    pub async fn run(&self, shutdown: &broadcast::Sender<()>) -> Result<(), CommonError> {
        if self.config.run_once {
            if self.config.update_loop_enabled() {
                info!("running one update cycle and exiting");
                self.trigger_cycle().await;
            }
            return Ok(());
        }

        let watcher_handle = self
            .watcher
            .as_ref()
            .map(|watcher| tokio::spawn(Arc::clone(watcher).run(shutdown.subscribe())));

        if self.config.update_loop_enabled() {
            let cadence = Cadence::from_config(&self.config)?;
            let scheduler = Scheduler::new(cadence);
            scheduler
                .run(shutdown.subscribe(), || self.trigger_cycle())
                .await;
        } else {
            let mut rx = shutdown.subscribe();
            let _ = rx.recv().await;
        }

        // The scheduler no longer fires; wait for the watcher to quiesce.
        if let Some(handle) = watcher_handle {
            if let Err(err) = handle.await {
                error!(error = %err, "health watcher task failed");
            }
        }

        let stats = self.updater.stats();
        info!(
            total_updated = stats.total_updated(),
            total_failed = stats.total_failed(),
            "supervisor stopped"
        );
        Ok(())
    }

    /// Runs one update cycle unless one is already in flight, in which case
    /// the tick is coalesced (dropped).
    pub async fn trigger_cycle(&self) {
        match self.cycle_gate.try_lock() {
            Ok(_guard) => {
                if let Err(err) = Arc::clone(&self.updater).run().await {
                    error!(error = %err, "update cycle failed");
                }
            }
            Err(_) => {
                debug!("update cycle already in flight, dropping tick");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{snapshot, MockEngine};
    use std::time::Duration;

    fn supervisor(engine: &Arc<MockEngine>, config: Config) -> Supervisor {
        Supervisor::new(Arc::clone(engine) as DynEngine, config).unwrap()
    }

    #[tokio::test]
    async fn concurrent_triggers_coalesce() {
        let engine = MockEngine::new(vec![snapshot("c1", "api", "api:latest", "sha256:a")]);
        engine.set_digests("api:latest", &["sha256:da", "sha256:db"]);
        engine.set_recreate_delay(Duration::from_millis(20));

        let sup = supervisor(&engine, Config::default());
        tokio::join!(sup.trigger_cycle(), sup.trigger_cycle());

        // The second tick was dropped, so only one cycle listed containers.
        assert_eq!(engine.call_count("list"), 1);
        assert_eq!(engine.call_count("recreate"), 1);
    }

    #[tokio::test]
    async fn sequential_triggers_both_run() {
        let engine = MockEngine::new(vec![snapshot("c1", "api", "api:latest", "sha256:a")]);

        let sup = supervisor(&engine, Config::default());
        sup.trigger_cycle().await;
        sup.trigger_cycle().await;

        assert_eq!(engine.call_count("list"), 2);
    }

    #[tokio::test]
    async fn run_once_runs_a_single_cycle() {
        let engine = MockEngine::new(vec![snapshot("c1", "api", "api:latest", "sha256:a")]);
        let config = Config {
            run_once: true,
            ..Default::default()
        };

        let sup = supervisor(&engine, config);
        let (shutdown, _) = broadcast::channel(1);
        sup.run(&shutdown).await.unwrap();

        assert_eq!(engine.call_count("list"), 1);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let engine = MockEngine::new(vec![]);
        let config = Config {
            schedule: Some("bogus".to_string()),
            ..Default::default()
        };
        assert!(Supervisor::new(Arc::clone(&engine) as DynEngine, config).is_err());
    }
}
