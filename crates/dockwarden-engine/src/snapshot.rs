//! Immutable per-container snapshots.
//!
//! A [`ContainerSnapshot`] is a value taken from one engine list or inspect
//! call. Policy that lives on the container itself (opt-in/opt-out labels,
//! stop timeout, scope) is derived here so the control loops never touch the
//! raw label map.

use std::collections::HashMap;
use std::time::Duration;

use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, ContainerSummary, HealthStatusEnum,
};
use chrono::{DateTime, Utc};

use crate::image::ImageRef;

/// Label that opts a container into management when label-enable mode is on.
pub const LABEL_ENABLE: &str = "dockwarden.enable";
/// Label that scopes a container to one warden instance.
pub const LABEL_SCOPE: &str = "dockwarden.scope";
/// Label naming the signal used to stop the container.
pub const LABEL_STOP_SIGNAL: &str = "dockwarden.stop-signal";
/// Label carrying the graceful stop window in integer seconds.
pub const LABEL_STOP_TIMEOUT: &str = "dockwarden.stop-timeout";
/// Label that opts a container out of image updates.
pub const LABEL_UPDATE_ENABLE: &str = "dockwarden.update.enable";
/// Label that opts a container out of health watching.
pub const LABEL_WATCH_ENABLE: &str = "dockwarden.watch.enable";
/// Label overriding the global unhealthy action for one container.
pub const LABEL_WATCH_ACTION: &str = "dockwarden.watch.action";

/// Container lifecycle state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Removing,
    /// Anything the engine reports that we do not model.
    Other,
}

impl ContainerState {
    fn parse(s: &str) -> Self {
        match s {
            "created" => Self::Created,
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            "removing" => Self::Removing,
            _ => Self::Other,
        }
    }

    const fn from_inspect(status: ContainerStateStatusEnum) -> Self {
        match status {
            ContainerStateStatusEnum::CREATED => Self::Created,
            ContainerStateStatusEnum::RUNNING => Self::Running,
            ContainerStateStatusEnum::RESTARTING => Self::Restarting,
            ContainerStateStatusEnum::PAUSED => Self::Paused,
            ContainerStateStatusEnum::EXITED => Self::Exited,
            ContainerStateStatusEnum::DEAD => Self::Dead,
            ContainerStateStatusEnum::REMOVING => Self::Removing,
            ContainerStateStatusEnum::EMPTY => Self::Other,
        }
    }
}

/// Container health as reported by the engine.
///
/// Engines without a configured healthcheck report no health at all; that
/// maps to [`HealthState::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Starting,
    None,
}

impl HealthState {
    /// Derives health from a list-summary status string. The engine only
    /// exposes health in list responses as a suffix of the human-readable
    /// status, e.g. `Up 3 hours (unhealthy)`.
    fn from_status_suffix(status: &str) -> Self {
        if status.ends_with("(healthy)") {
            Self::Healthy
        } else if status.ends_with("(unhealthy)") {
            Self::Unhealthy
        } else if status.ends_with("(health: starting)") {
            Self::Starting
        } else {
            Self::None
        }
    }

    fn from_inspect(status: Option<HealthStatusEnum>) -> Self {
        match status {
            Some(HealthStatusEnum::HEALTHY) => Self::Healthy,
            Some(HealthStatusEnum::UNHEALTHY) => Self::Unhealthy,
            Some(HealthStatusEnum::STARTING) => Self::Starting,
            _ => Self::None,
        }
    }
}

/// Immutable view of one container at one point in time.
#[derive(Debug, Clone)]
pub struct ContainerSnapshot {
    /// Engine-assigned container id.
    pub id: String,
    /// Container name with the leading slash stripped.
    pub name: String,
    /// Image reference as declared on the container.
    pub image: ImageRef,
    /// Local content identity of the image the container runs.
    pub image_id: String,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Health, if the container has a healthcheck.
    pub health: HealthState,
    /// Raw label map.
    pub labels: HashMap<String, String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ContainerSnapshot {
    /// Builds a snapshot from an engine list entry.
    #[must_use]
    pub fn from_summary(summary: ContainerSummary) -> Self {
        let name = summary
            .names
            .as_deref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let status = summary.status.unwrap_or_default();

        Self {
            id: summary.id.unwrap_or_default(),
            name,
            image: ImageRef::new(summary.image.unwrap_or_default()),
            image_id: summary.image_id.unwrap_or_default(),
            state: ContainerState::parse(summary.state.as_deref().unwrap_or_default()),
            health: HealthState::from_status_suffix(&status),
            labels: summary.labels.unwrap_or_default(),
            created_at: summary
                .created
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or(DateTime::UNIX_EPOCH),
        }
    }

    /// Builds a snapshot from an engine inspect response.
    #[must_use]
    pub fn from_inspect(inspect: ContainerInspectResponse) -> Self {
        let config = inspect.config.unwrap_or_default();
        let state = inspect.state.unwrap_or_default();

        Self {
            id: inspect.id.unwrap_or_default(),
            name: inspect
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: ImageRef::new(config.image.unwrap_or_default()),
            image_id: inspect.image.unwrap_or_default(),
            state: state
                .status
                .map_or(ContainerState::Other, ContainerState::from_inspect),
            health: HealthState::from_inspect(state.health.and_then(|h| h.status)),
            labels: config.labels.unwrap_or_default(),
            created_at: inspect
                .created
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map_or(DateTime::UNIX_EPOCH, |dt| dt.with_timezone(&Utc)),
        }
    }

    /// Returns a label value, if present.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Whether the container opts in under `label_name`; `default` applies
    /// when the label is absent.
    #[must_use]
    pub fn enabled(&self, label_name: &str, default: bool) -> bool {
        self.label(label_name).map_or(default, |v| v == "true")
    }

    /// Whether image updates are permitted for this container. Default on.
    #[must_use]
    pub fn update_enabled(&self) -> bool {
        self.enabled(LABEL_UPDATE_ENABLE, true)
    }

    /// Whether health watching is permitted for this container. Default on.
    #[must_use]
    pub fn watch_enabled(&self) -> bool {
        self.enabled(LABEL_WATCH_ENABLE, true)
    }

    /// Per-container override for the unhealthy action, if labeled.
    #[must_use]
    pub fn watch_action(&self) -> Option<&str> {
        self.label(LABEL_WATCH_ACTION)
    }

    /// The container's scope label, empty when unset.
    #[must_use]
    pub fn scope(&self) -> &str {
        self.label(LABEL_SCOPE).unwrap_or_default()
    }

    /// The signal used to stop this container.
    #[must_use]
    pub fn stop_signal(&self) -> &str {
        self.label(LABEL_STOP_SIGNAL).unwrap_or("SIGTERM")
    }

    /// The graceful stop window: the label value in integer seconds when
    /// present and parseable, else `default`.
    #[must_use]
    pub fn stop_timeout(&self, default: Duration) -> Duration {
        self.label(LABEL_STOP_TIMEOUT)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    /// Whether the container is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    /// Whether the container reports healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.health == HealthState::Healthy
    }

    /// Whether the container reports unhealthy.
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        self.health == HealthState::Unhealthy
    }
}
