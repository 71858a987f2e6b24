//! DockWarden daemon: container auto-update and health monitor.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dockwarden_core::{Config, HealthAction, LoggingConfig, Mode, Supervisor};
use dockwarden_engine::{DockerEngine, DynEngine, Engine};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "dockwarden")]
#[command(author, version, long_about = None)]
#[command(about = "Container-fleet warden: automatic image updates and health monitoring")]
pub struct WardenArgs {
    /// Configuration file path.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Operation mode.
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Run one update cycle and exit.
    #[arg(long)]
    pub run_once: bool,

    /// Update check interval in seconds.
    #[arg(long)]
    pub interval: Option<u64>,

    /// Cron expression with seconds granularity; overrides the interval.
    #[arg(long)]
    pub schedule: Option<String>,

    /// Remove old images after updating.
    #[arg(long)]
    pub cleanup: Option<bool>,

    /// Pull images but never recreate containers.
    #[arg(long)]
    pub no_restart: bool,

    /// Never pull new images.
    #[arg(long)]
    pub no_pull: bool,

    /// Detect and report updates without applying them.
    #[arg(long)]
    pub monitor_only: bool,

    /// Recreate containers one at a time.
    #[arg(long)]
    pub rolling_restart: bool,

    /// Default container stop timeout in seconds.
    #[arg(long)]
    pub stop_timeout: Option<u64>,

    /// Only manage containers carrying the enable label.
    #[arg(long)]
    pub label_enable: bool,

    /// Label consulted in label-enable mode.
    #[arg(long)]
    pub label_name: Option<String>,

    /// Only manage containers with a matching scope label.
    #[arg(long)]
    pub scope: Option<String>,

    /// Consider stopped containers for updates too.
    #[arg(long)]
    pub include_stopped: bool,

    /// Container names to exclude, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub disable_containers: Vec<String>,

    /// Enable health monitoring.
    #[arg(long)]
    pub health_watch: Option<bool>,

    /// Action on unhealthy containers.
    #[arg(long, value_enum)]
    pub health_action: Option<HealthActionArg>,

    /// Check engine reachability and exit.
    #[arg(long)]
    pub health_check: bool,

    /// Path to a registry authentication config.
    #[arg(long)]
    pub registry_secret: Option<PathBuf>,

    /// Notification webhook URL.
    #[arg(long)]
    pub notification_url: Option<String>,

    /// Name of the container this process runs in (self-protection).
    #[arg(long)]
    pub self_name: Option<String>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format: text, json.
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Full,
    Update,
    Watch,
    Monitor,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Full => Self::Full,
            ModeArg::Update => Self::Update,
            ModeArg::Watch => Self::Watch,
            ModeArg::Monitor => Self::Monitor,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HealthActionArg {
    Restart,
    Notify,
}

impl From<HealthActionArg> for HealthAction {
    fn from(value: HealthActionArg) -> Self {
        match value {
            HealthActionArg::Restart => Self::Restart,
            HealthActionArg::Notify => Self::Notify,
        }
    }
}

impl WardenArgs {
    /// Applies CLI flags on top of the merged configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if self.run_once {
            config.run_once = true;
        }
        if let Some(interval) = self.interval {
            config.interval_secs = interval;
        }
        if let Some(schedule) = &self.schedule {
            config.schedule = Some(schedule.clone());
        }
        if let Some(cleanup) = self.cleanup {
            config.cleanup = cleanup;
        }
        if self.no_restart {
            config.no_restart = true;
        }
        if self.no_pull {
            config.no_pull = true;
        }
        if self.monitor_only {
            config.monitor_only = true;
        }
        if self.rolling_restart {
            config.rolling_restart = true;
        }
        if let Some(stop_timeout) = self.stop_timeout {
            config.stop_timeout_secs = stop_timeout;
        }
        if self.label_enable {
            config.label_enable = true;
        }
        if let Some(label_name) = &self.label_name {
            config.label_name = label_name.clone();
        }
        if let Some(scope) = &self.scope {
            config.scope = Some(scope.clone());
        }
        if self.include_stopped {
            config.include_stopped = true;
        }
        if !self.disable_containers.is_empty() {
            config.disable_containers = self.disable_containers.clone();
        }
        if let Some(health_watch) = self.health_watch {
            config.health_watch = health_watch;
        }
        if let Some(action) = self.health_action {
            config.health_action = action.into();
        }
        if let Some(secret) = &self.registry_secret {
            config.registry_secret = Some(secret.clone());
        }
        if let Some(url) = &self.notification_url {
            config.notification_url = Some(url.clone());
        }
        if let Some(name) = &self.self_name {
            config.self_name = Some(name.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = WardenArgs::parse();

    let mut config =
        Config::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);

    init_logging(&config.logging);

    // Health-check mode: report engine reachability through the exit code,
    // nothing else.
    if args.health_check {
        match health_check().await {
            Ok(()) => {
                println!("engine reachable");
                std::process::exit(0);
            }
            Err(err) => {
                eprintln!("health check failed: {err}");
                std::process::exit(1);
            }
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "DockWarden starting");

    let engine: DynEngine = Arc::new(
        DockerEngine::connect(config.registry_secret.clone())
            .await
            .context("failed to connect to container engine")?,
    );
    engine
        .ping()
        .await
        .context("container engine is not reachable")?;

    let supervisor = Supervisor::new(engine, config).context("invalid configuration")?;
    let shutdown = shutdown_channel();
    supervisor.run(&shutdown).await?;

    info!("DockWarden stopped");
    Ok(())
}

async fn health_check() -> Result<()> {
    let engine = DockerEngine::connect(None)
        .await
        .context("failed to connect to container engine")?;
    engine.ping().await.context("engine did not answer ping")?;
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "dockwarden={0},dockwarden_core={0},dockwarden_engine={0}",
            logging.level
        )
        .into()
    });

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

/// Creates the shutdown fan-out. The returned sender fires once on the
/// first SIGINT or SIGTERM.
fn shutdown_channel() -> broadcast::Sender<()> {
    let (tx, _) = broadcast::channel(1);
    let sender = tx.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = terminate => info!("received SIGTERM"),
        }

        let _ = sender.send(());
    });

    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = WardenArgs::parse_from([
            "dockwarden",
            "--mode",
            "monitor",
            "--interval",
            "300",
            "--cleanup",
            "false",
            "--rolling-restart",
            "--disable-containers",
            "db,cache",
            "--self-name",
            "dockwarden",
        ]);

        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.mode, Mode::Monitor);
        assert_eq!(config.interval_secs, 300);
        assert!(!config.cleanup);
        assert!(config.rolling_restart);
        assert_eq!(config.disable_containers, vec!["db", "cache"]);
        assert_eq!(config.self_name.as_deref(), Some("dockwarden"));
    }

    #[test]
    fn defaults_survive_empty_flags() {
        let args = WardenArgs::parse_from(["dockwarden"]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.mode, Mode::Full);
        assert!(config.cleanup);
        assert!(config.health_watch);
        assert!(!config.run_once);
    }
}
