//! # dockwarden-error
//!
//! Common error types shared across `DockWarden` crates.
//!
//! Crate-specific error enums wrap [`CommonError`] via `#[from]` so that
//! I/O, configuration, and lookup failures keep one vocabulary everywhere.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod common;

pub use common::CommonError;
