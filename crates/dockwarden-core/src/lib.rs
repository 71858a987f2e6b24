//! # dockwarden-core
//!
//! The control loops of the container-fleet warden:
//!
//! - [`Updater`]: digest-based update detection and in-place recreation
//!   with bounded concurrency
//! - [`HealthWatcher`]: per-container retry state machines with give-up
//!   semantics and version reset
//! - [`Scheduler`]: interval or cron cadence with cooperative stop
//! - [`Supervisor`]: wiring, single-flight of the update cycle, shutdown
//! - [`Notifier`]: fire-and-forget webhook events
//!
//! All engine access goes through the `Engine` trait from
//! `dockwarden-engine`, so every loop here is testable against an
//! in-memory engine.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod event;
pub mod filter;
pub mod health;
pub mod scheduler;
pub mod supervisor;
pub mod updater;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, HealthAction, LoggingConfig, Mode};
pub use event::{Event, EventKind, Notifier};
pub use filter::{FilterPolicy, SelfIdentity};
pub use health::{HealthWatcher, WatcherStats, MAX_RESTART_ATTEMPTS};
pub use scheduler::{Cadence, Scheduler};
pub use supervisor::Supervisor;
pub use updater::{CycleStats, CycleSummary, UpdateResult, Updater};
