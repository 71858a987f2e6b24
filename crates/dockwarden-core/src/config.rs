//! Configuration management.
//!
//! Configuration is merged from the following sources, later sources
//! winning:
//!
//! 1. Default values
//! 2. System config file (`/etc/dockwarden/config.toml`)
//! 3. User config file (`~/.config/dockwarden/config.toml`)
//! 4. Environment variables (`DOCKWARDEN_*`, `__` separating nested keys)
//!
//! CLI flags are applied on top by the daemon binary. After merging,
//! [`Config::validate`] runs once; a bad cron expression or zero interval is
//! fatal at startup rather than surfacing mid-cycle.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use dockwarden_error::CommonError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Which control loops the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Both the update loop and the health watcher.
    Full,
    /// Update loop only.
    Update,
    /// Health watcher only.
    Watch,
    /// Both loops, mutating nothing: monitor-only updates, notify-only health.
    Monitor,
}

/// Action taken when a watched container turns unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthAction {
    /// Restart the container (bounded by the retry state machine).
    Restart,
    /// Emit an event only.
    Notify,
}

impl HealthAction {
    /// Parses a label or flag value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "restart" => Some(Self::Restart),
            "notify" => Some(Self::Notify),
            _ => None,
        }
    }
}

/// DockWarden configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Operation mode.
    pub mode: Mode,
    /// Run one update cycle and exit.
    pub run_once: bool,
    /// Update check interval in seconds (interval mode).
    pub interval_secs: u64,
    /// Cron expression with seconds granularity; overrides the interval.
    pub schedule: Option<String>,
    /// Remove the old image after a successful update.
    pub cleanup: bool,
    /// Pull images but never recreate containers.
    pub no_restart: bool,
    /// Never pull; containers are only ever recreated by hand.
    pub no_pull: bool,
    /// Detect and report updates without performing them.
    pub monitor_only: bool,
    /// Recreate containers one at a time.
    pub rolling_restart: bool,
    /// Default graceful stop window in seconds.
    pub stop_timeout_secs: u64,
    /// Only manage containers that carry `label_name` set to `"true"`.
    pub label_enable: bool,
    /// Label consulted in label-enable mode.
    pub label_name: String,
    /// Only manage containers whose scope label matches.
    pub scope: Option<String>,
    /// Consider stopped containers for updates too.
    pub include_stopped: bool,
    /// Container names excluded from management.
    pub disable_containers: Vec<String>,
    /// Enable the health watcher.
    pub health_watch: bool,
    /// Global unhealthy action; containers may override per label.
    pub health_action: HealthAction,
    /// Health watcher tick cadence in seconds.
    pub health_interval_secs: u64,
    /// Webhook URL for event notifications.
    pub notification_url: Option<String>,
    /// Path to a registry auth config consulted before the conventional ones.
    pub registry_secret: Option<PathBuf>,
    /// Name of the container this process runs in, for self-protection.
    pub self_name: Option<String>,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Full,
            run_once: false,
            interval_secs: 60,
            schedule: None,
            cleanup: true,
            no_restart: false,
            no_pull: false,
            monitor_only: false,
            rolling_restart: false,
            stop_timeout_secs: 10,
            label_enable: false,
            label_name: "dockwarden.enable".to_string(),
            scope: None,
            include_stopped: false,
            disable_containers: Vec::new(),
            health_watch: true,
            health_action: HealthAction::Restart,
            health_interval_secs: 10,
            notification_url: None,
            registry_secret: None,
            self_name: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value fails to
    /// deserialize.
    pub fn load(file: Option<&Path>) -> Result<Self, CommonError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        } else {
            figment = figment
                .merge(Toml::file(system_config_path()))
                .merge(Toml::file(user_config_path()));
        }

        figment
            .merge(Env::prefixed("DOCKWARDEN_").split("__"))
            .extract()
            .map_err(|e| CommonError::config(e.to_string()))
    }

    /// Validates cross-field constraints. Called once at startup.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid cron expression or a
    /// zero interval.
    pub fn validate(&self) -> Result<(), CommonError> {
        if let Some(schedule) = &self.schedule {
            cron::Schedule::from_str(schedule)
                .map_err(|e| CommonError::config(format!("invalid cron schedule: {e}")))?;
        }
        if self.interval_secs == 0 {
            return Err(CommonError::config("interval must be positive"));
        }
        if self.health_interval_secs == 0 {
            return Err(CommonError::config("health interval must be positive"));
        }
        Ok(())
    }

    /// Update check interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Default graceful stop window.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Health watcher tick cadence.
    #[must_use]
    pub const fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    /// Whether the update loop runs at all.
    #[must_use]
    pub fn update_loop_enabled(&self) -> bool {
        self.mode != Mode::Watch
    }

    /// Whether the health watcher runs at all.
    #[must_use]
    pub fn watch_loop_enabled(&self) -> bool {
        self.health_watch && self.mode != Mode::Update
    }

    /// Whether update cycles may mutate engine state.
    #[must_use]
    pub fn monitor_only(&self) -> bool {
        self.monitor_only || self.mode == Mode::Monitor
    }

    /// The unhealthy action after mode adjustments.
    #[must_use]
    pub fn effective_health_action(&self) -> HealthAction {
        if self.mode == Mode::Monitor {
            HealthAction::Notify
        } else {
            self.health_action
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (text, json).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("dockwarden")
        .join("config.toml")
}

fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/dockwarden/config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mode, Mode::Full);
        assert_eq!(config.interval_secs, 60);
        assert_eq!(config.stop_timeout_secs, 10);
        assert!(config.cleanup);
        assert!(config.health_watch);
        assert_eq!(config.health_action, HealthAction::Restart);
        assert_eq!(config.label_name, "dockwarden.enable");
        assert_eq!(config.health_interval_secs, 10);
        assert!(!config.label_enable);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_cron() {
        let config = Config {
            schedule: Some("not a schedule".to_string()),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid cron schedule"));
    }

    #[test]
    fn test_validate_accepts_seconds_cron() {
        let config = Config {
            schedule: Some("0 */5 * * * *".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = Config {
            interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_gating() {
        let update = Config {
            mode: Mode::Update,
            ..Default::default()
        };
        assert!(update.update_loop_enabled());
        assert!(!update.watch_loop_enabled());

        let watch = Config {
            mode: Mode::Watch,
            ..Default::default()
        };
        assert!(!watch.update_loop_enabled());
        assert!(watch.watch_loop_enabled());

        let monitor = Config {
            mode: Mode::Monitor,
            ..Default::default()
        };
        assert!(monitor.update_loop_enabled());
        assert!(monitor.watch_loop_enabled());
        assert!(monitor.monitor_only());
        assert_eq!(monitor.effective_health_action(), HealthAction::Notify);
    }

    #[test]
    fn test_health_watch_flag_disables_watch_loop() {
        let config = Config {
            health_watch: false,
            ..Default::default()
        };
        assert!(!config.watch_loop_enabled());
    }

    #[test]
    fn test_health_action_parse() {
        assert_eq!(HealthAction::parse("restart"), Some(HealthAction::Restart));
        assert_eq!(HealthAction::parse("notify"), Some(HealthAction::Notify));
        assert_eq!(HealthAction::parse("reboot"), None);
    }
}
