//! Typed events and the webhook notifier.
//!
//! Events are fire-and-forget: delivery failures are logged at warning and
//! never propagate into the control loops. The webhook flavor is sniffed
//! from the URL so a single `--notification-url` flag covers rich-embed,
//! simple-text, and generic JSON consumers.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Per-delivery timeout.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Kinds of user-visible state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ContainerUpdated,
    ContainerRestarted,
    ContainerUnhealthy,
    ContainerGaveUp,
    UpdateCycleStart,
    UpdateCycleEnd,
}

impl EventKind {
    /// Wire name of the event kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ContainerUpdated => "container_updated",
            Self::ContainerRestarted => "container_restarted",
            Self::ContainerUnhealthy => "container_unhealthy",
            Self::ContainerGaveUp => "container_gave_up",
            Self::UpdateCycleStart => "update_cycle_start",
            Self::UpdateCycleEnd => "update_cycle_end",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A notification event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event kind.
    pub kind: EventKind,
    /// Container name, when the event concerns one container.
    pub container_name: Option<String>,
    /// Image reference, when relevant.
    pub image: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Per-kind extras, flattened into generic payloads.
    pub extra: Map<String, Value>,
}

impl Event {
    fn new(kind: EventKind, message: String) -> Self {
        Self {
            kind,
            container_name: None,
            image: None,
            message,
            timestamp: Utc::now(),
            extra: Map::new(),
        }
    }

    fn with_container(mut self, name: &str, image: &str) -> Self {
        self.container_name = Some(name.to_string());
        self.image = Some(image.to_string());
        self
    }

    fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// A container was recreated on a new image.
    #[must_use]
    pub fn container_updated(name: &str, image: &str, old_digest: &str, new_digest: &str) -> Self {
        Self::new(
            EventKind::ContainerUpdated,
            format!("Container {name} has been updated"),
        )
        .with_container(name, image)
        .with_extra("old_digest", json!(old_digest))
        .with_extra("new_digest", json!(new_digest))
    }

    /// An unhealthy container was restarted.
    #[must_use]
    pub fn container_restarted(name: &str, image: &str, attempts: u32) -> Self {
        Self::new(
            EventKind::ContainerRestarted,
            format!("Container {name} restarted (attempt {attempts})"),
        )
        .with_container(name, image)
        .with_extra("restart_attempts", json!(attempts))
    }

    /// A container reported unhealthy.
    #[must_use]
    pub fn container_unhealthy(name: &str, image: &str, attempts: u32) -> Self {
        Self::new(
            EventKind::ContainerUnhealthy,
            format!("Container {name} is unhealthy (attempt {attempts})"),
        )
        .with_container(name, image)
        .with_extra("restart_attempts", json!(attempts))
    }

    /// The retry state machine gave up on a container.
    #[must_use]
    pub fn container_gave_up(name: &str, image: &str, max_attempts: u32) -> Self {
        Self::new(
            EventKind::ContainerGaveUp,
            format!(
                "Container {name}: giving up after {max_attempts} restart attempts. \
                 Waiting for a new image version."
            ),
        )
        .with_container(name, image)
        .with_extra("max_attempts", json!(max_attempts))
    }

    /// An update cycle began.
    #[must_use]
    pub fn cycle_start() -> Self {
        Self::new(EventKind::UpdateCycleStart, "Update cycle started".into())
    }

    /// An update cycle finished.
    #[must_use]
    pub fn cycle_end(updated: usize, failed: usize) -> Self {
        Self::new(
            EventKind::UpdateCycleEnd,
            format!("Update cycle complete: {updated} updated, {failed} failed"),
        )
        .with_extra("updated", json!(updated))
        .with_extra("failed", json!(failed))
    }
}

/// Fire-and-forget event sink posting to a webhook.
pub struct Notifier {
    url: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    /// Creates a notifier. With no URL, every send is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dockwarden/", env!("CARGO_PKG_VERSION")))
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .expect("failed to create HTTP client");
        Self { url, client }
    }

    /// Whether a webhook URL is configured.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Delivers an event. Failures are logged at warning and swallowed.
    pub async fn send(&self, event: Event) {
        let Some(url) = &self.url else {
            debug!(kind = %event.kind, "no notification URL configured, skipping");
            return;
        };

        let payload = render(url, &event);
        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_client_error() || response.status().is_server_error() => {
                warn!(
                    kind = %event.kind,
                    status = %response.status(),
                    "notification webhook rejected event"
                );
            }
            Ok(_) => debug!(kind = %event.kind, "notification sent"),
            Err(err) => warn!(kind = %event.kind, error = %err, "failed to send notification"),
        }
    }
}

/// Picks the payload shape from the webhook URL.
fn render(url: &str, event: &Event) -> Value {
    if url.contains("discord.com/api/webhooks") {
        discord_payload(event)
    } else if url.contains("hooks.slack.com") {
        slack_payload(event)
    } else {
        generic_payload(event)
    }
}

fn discord_payload(event: &Event) -> Value {
    let color = match event.kind {
        EventKind::ContainerUpdated => 0x2ecc71,
        EventKind::ContainerUnhealthy | EventKind::ContainerGaveUp => 0xe74c3c,
        EventKind::ContainerRestarted => 0xf39c12,
        EventKind::UpdateCycleStart | EventKind::UpdateCycleEnd => 0x3498db,
    };

    let mut fields = Vec::new();
    if let Some(name) = &event.container_name {
        fields.push(json!({"name": "Container", "value": name, "inline": true}));
    }
    if let Some(image) = &event.image {
        fields.push(json!({"name": "Image", "value": format!("`{image}`"), "inline": true}));
    }

    json!({
        "embeds": [{
            "title": format!("DockWarden: {}", event.kind),
            "description": event.message,
            "color": color,
            "fields": fields,
            "timestamp": event.timestamp.to_rfc3339(),
            "footer": {"text": "DockWarden"},
        }]
    })
}

fn slack_payload(event: &Event) -> Value {
    let emoji = match event.kind {
        EventKind::ContainerUpdated => ":white_check_mark:",
        EventKind::ContainerUnhealthy | EventKind::ContainerGaveUp => ":x:",
        EventKind::ContainerRestarted => ":arrows_counterclockwise:",
        EventKind::UpdateCycleStart | EventKind::UpdateCycleEnd => ":whale:",
    };

    let mut text = format!("{emoji} *DockWarden:* {}", event.message);
    if let Some(name) = &event.container_name {
        text.push_str(&format!("\n• Container: `{name}`"));
    }
    if let Some(image) = &event.image {
        text.push_str(&format!("\n• Image: `{image}`"));
    }

    json!({"text": text})
}

fn generic_payload(event: &Event) -> Value {
    let mut payload = Map::new();
    payload.insert("source".into(), json!("dockwarden"));
    payload.insert("type".into(), json!(event.kind.as_str()));
    payload.insert("message".into(), json!(event.message));
    payload.insert("timestamp".into(), json!(event.timestamp.to_rfc3339()));

    if let Some(name) = &event.container_name {
        payload.insert("container_name".into(), json!(name));
    }
    if let Some(image) = &event.image {
        payload.insert("image".into(), json!(image));
    }
    for (key, value) in &event.extra {
        payload.insert(key.clone(), value.clone());
    }

    Value::Object(payload)
}
