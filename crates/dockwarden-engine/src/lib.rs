//! # dockwarden-engine
//!
//! Typed adapter over a Docker-compatible container engine.
//!
//! This crate owns everything that touches the engine wire:
//!
//! - The [`Engine`] trait and its bollard-backed [`DockerEngine`]
//! - Immutable [`ContainerSnapshot`] views with label-derived policy
//! - [`ImageRef`] parsing and the floating-tag heuristic
//! - Registry auth-file resolution for pulls
//!
//! The control loops in `dockwarden-core` depend only on the trait, which
//! keeps them testable against an in-memory engine.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
mod client;
pub mod error;
mod image;
mod snapshot;

pub use client::{DockerEngine, DynEngine, Engine, ListOptions, PING_TIMEOUT};
pub use error::{EngineError, Result};
pub use image::{ImageRef, DEFAULT_REGISTRY};
pub use snapshot::{
    ContainerSnapshot, ContainerState, HealthState, LABEL_ENABLE, LABEL_SCOPE, LABEL_STOP_SIGNAL,
    LABEL_STOP_TIMEOUT, LABEL_UPDATE_ENABLE, LABEL_WATCH_ACTION, LABEL_WATCH_ENABLE,
};
