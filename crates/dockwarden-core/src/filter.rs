//! Reduces a snapshot set to the managed set.
//!
//! Rules are evaluated in a fixed order; the first failing rule drops the
//! container. Input order is preserved. The last rule is self-protection:
//! the warden must never recreate the container it runs in, because the
//! remove step would terminate the process mid-protocol.

use dockwarden_engine::ContainerSnapshot;
use tracing::debug;

use crate::config::Config;

/// How this process recognizes its own container.
#[derive(Debug, Clone, Default)]
pub struct SelfIdentity {
    /// Operator-supplied container name.
    pub name: Option<String>,
    /// Container id derived from the process cgroup, when running inside
    /// the engine it manages.
    pub container_id: Option<String>,
}

impl SelfIdentity {
    /// Detects identity from the configured name and `/proc/self/cgroup`.
    /// Absent both, no self-exclusion applies.
    #[must_use]
    pub fn detect(name: Option<String>) -> Self {
        let container_id = std::fs::read_to_string("/proc/self/cgroup")
            .ok()
            .and_then(|contents| container_id_from_cgroup(&contents));
        if let Some(id) = &container_id {
            debug!(container_id = %id, "detected own container id from cgroup");
        }
        Self { name, container_id }
    }

    fn matches(&self, snapshot: &ContainerSnapshot) -> bool {
        if self.name.as_deref() == Some(snapshot.name.as_str()) {
            return true;
        }
        self.container_id.as_deref() == Some(snapshot.id.as_str())
    }
}

/// Extracts a container id from cgroup contents.
///
/// Handles the v1 layout (`12:pids:/docker/<id>`) and the v2 systemd layout
/// (`0::/system.slice/docker-<id>.scope`). The id is the 64-hex path
/// segment.
fn container_id_from_cgroup(contents: &str) -> Option<String> {
    for line in contents.lines() {
        let path = line.splitn(3, ':').nth(2)?;
        for segment in path.split('/') {
            let segment = segment.strip_prefix("docker-").unwrap_or(segment);
            let segment = segment.strip_suffix(".scope").unwrap_or(segment);
            if segment.len() == 64 && segment.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Some(segment.to_string());
            }
        }
    }
    None
}

/// Policy deciding which containers are managed.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    /// Only manage containers carrying `label_name` set to `"true"`.
    pub label_enable: bool,
    /// Label consulted in label-enable mode.
    pub label_name: String,
    /// Required scope label value, when non-empty.
    pub scope: Option<String>,
    /// Container names excluded outright.
    pub disable_containers: Vec<String>,
    /// Keep stopped containers in the managed set.
    pub include_stopped: bool,
    /// This process's own container, excluded from updater processing.
    pub self_identity: SelfIdentity,
}

impl FilterPolicy {
    /// Builds the policy from configuration plus a detected self-identity.
    #[must_use]
    pub fn from_config(config: &Config, self_identity: SelfIdentity) -> Self {
        Self {
            label_enable: config.label_enable,
            label_name: config.label_name.clone(),
            scope: config.scope.clone(),
            disable_containers: config.disable_containers.clone(),
            include_stopped: config.include_stopped,
            self_identity,
        }
    }

    /// Whether one container passes every rule.
    #[must_use]
    pub fn is_managed(&self, snapshot: &ContainerSnapshot) -> bool {
        if self
            .disable_containers
            .iter()
            .any(|name| name == &snapshot.name)
        {
            return false;
        }
        if self.label_enable && !snapshot.enabled(&self.label_name, false) {
            return false;
        }
        if let Some(scope) = self.scope.as_deref() {
            if !scope.is_empty() && snapshot.scope() != scope {
                return false;
            }
        }
        if !snapshot.is_running() && !self.include_stopped {
            return false;
        }
        if self.self_identity.matches(snapshot) {
            debug!(container = %snapshot.name, "excluding own container");
            return false;
        }
        true
    }

    /// Filters a snapshot sequence, preserving order.
    #[must_use]
    pub fn apply(&self, snapshots: Vec<ContainerSnapshot>) -> Vec<ContainerSnapshot> {
        snapshots
            .into_iter()
            .filter(|snapshot| self.is_managed(snapshot))
            .collect()
    }
}
