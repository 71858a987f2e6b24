//! Image reference parsing.
//!
//! References have the shape `[registry[:port]/]name[:tag][@digest]`. The
//! updater only needs three derived facts: the tag, the registry (for auth
//! lookup), and whether the reference is pinned. A pinned reference never
//! changes upstream, so pulling it is wasted work.

use serde::{Deserialize, Serialize};

/// Canonical identifier for the public hub registry.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tags that are expected to move between pushes. Anything else that is
/// non-empty is treated as pinned.
const FLOATING_TAGS: &[&str] = &[
    "latest",
    "edge",
    "main",
    "master",
    "dev",
    "develop",
    "development",
    "nightly",
    "stable",
    "beta",
    "alpha",
    "canary",
    "rc",
    "next",
    "preview",
];

/// Image reference as declared on a container (e.g. `ghcr.io/org/app:v1.2.3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef {
    raw: String,
}

impl ImageRef {
    /// Wraps a raw reference string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The reference exactly as declared; this is what gets handed to the
    /// engine for pull and image inspect.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The digest part, if the reference carries one.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.raw.split_once('@').map(|(_, digest)| digest)
    }

    /// The reference with any digest stripped.
    fn name(&self) -> &str {
        self.raw
            .split_once('@')
            .map_or(self.raw.as_str(), |(name, _)| name)
    }

    /// The tag, or the empty string for an implicit floating reference.
    ///
    /// A colon only counts as a tag separator when nothing after it is a
    /// path segment; `localhost:5000/app` has a port, not a tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        let name = self.name();
        match name.rfind(':') {
            Some(idx) if !name[idx + 1..].contains('/') => &name[idx + 1..],
            _ => "",
        }
    }

    /// The registry host this reference resolves against.
    ///
    /// The first path segment is a registry when it looks like a host
    /// (contains `.` or `:`); otherwise the public hub is implied.
    #[must_use]
    pub fn registry(&self) -> &str {
        let name = self.name();
        match name.split_once('/') {
            Some((first, _)) if first.contains('.') || first.contains(':') => first,
            _ => DEFAULT_REGISTRY,
        }
    }

    /// Whether the reference is pinned: it carries a digest, or its tag is a
    /// non-empty literal outside the floating set.
    #[must_use]
    pub fn pinned(&self) -> bool {
        if self.digest().is_some() {
            return true;
        }
        let tag = self.tag();
        if tag.is_empty() {
            return false;
        }
        let lower = tag.to_ascii_lowercase();
        !FLOATING_TAGS.contains(&lower.as_str())
    }
}

impl From<&str> for ImageRef {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ImageRef {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}
