//! Registry authentication resolution for image pulls.
//!
//! Credentials come from Docker-style auth config files:
//!
//! ```json
//! {"auths": {"ghcr.io": {"auth": "<base64 user:pass>"}}}
//! ```
//!
//! Candidate files are consulted in order (explicit secret path, then
//! `$DOCKER_CONFIG`, then the user config, then the root config); the first
//! file with a matching entry wins. No match means the pull proceeds
//! unauthenticated. Credential values are never logged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bollard::auth::DockerCredentials;
use serde::Deserialize;
use tracing::debug;

use crate::image::{ImageRef, DEFAULT_REGISTRY};

/// Hub credentials appear under several historical keys.
const HUB_LEGACY_KEYS: &[&str] = &[
    "https://index.docker.io/v1/",
    "index.docker.io",
    "https://index.docker.io",
    "registry-1.docker.io",
];

#[derive(Debug, Default, Deserialize)]
struct AuthFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: String,
}

/// Resolves pull credentials for `image`, consulting `secret_path` first
/// when configured.
#[must_use]
pub fn resolve(image: &ImageRef, secret_path: Option<&Path>) -> Option<DockerCredentials> {
    let registry = image.registry();

    for path in candidate_paths(secret_path) {
        if let Some(encoded) = auth_from_file(&path, registry) {
            debug!(registry, path = %path.display(), "found registry credentials");
            return decode(registry, &encoded);
        }
    }

    debug!(registry, "no registry credentials found, pulling unauthenticated");
    None
}

fn candidate_paths(secret_path: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = secret_path {
        paths.push(p.to_path_buf());
    }
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        paths.push(PathBuf::from(dir).join("config.json"));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".docker").join("config.json"));
    }
    paths.push(PathBuf::from("/root/.docker/config.json"));
    paths
}

fn auth_from_file(path: &Path, registry: &str) -> Option<String> {
    let data = std::fs::read(path).ok()?;
    let file: AuthFile = match serde_json::from_slice(&data) {
        Ok(file) => file,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "skipping unparseable auth config");
            return None;
        }
    };
    lookup(&file, registry)
}

/// Matches `registry` against the file's `auths` map: verbatim, then with an
/// `https://` prefix, then the hub's legacy keys.
fn lookup(file: &AuthFile, registry: &str) -> Option<String> {
    let entry = |key: &str| {
        file.auths
            .get(key)
            .filter(|e| !e.auth.is_empty())
            .map(|e| e.auth.clone())
    };

    if let Some(auth) = entry(registry) {
        return Some(auth);
    }
    if let Some(auth) = entry(&format!("https://{registry}")) {
        return Some(auth);
    }
    if registry == DEFAULT_REGISTRY {
        for key in HUB_LEGACY_KEYS {
            if let Some(auth) = entry(key) {
                return Some(auth);
            }
        }
    }
    None
}

fn decode(registry: &str, encoded: &str) -> Option<DockerCredentials> {
    let bytes = BASE64.decode(encoded).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let (username, password) = text.split_once(':')?;
    Some(DockerCredentials {
        username: Some(username.to_string()),
        password: Some(password.to_string()),
        serveraddress: Some(registry.to_string()),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn auth_file(entries: &[(&str, &str)]) -> AuthFile {
        AuthFile {
            auths: entries
                .iter()
                .map(|(k, v)| {
                    (
                        (*k).to_string(),
                        AuthEntry {
                            auth: (*v).to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn encode(user_pass: &str) -> String {
        BASE64.encode(user_pass)
    }

    #[test]
    fn lookup_exact_match() {
        let file = auth_file(&[("ghcr.io", "Zm9vOmJhcg==")]);
        assert_eq!(lookup(&file, "ghcr.io").as_deref(), Some("Zm9vOmJhcg=="));
    }

    #[test]
    fn lookup_https_prefix_fallback() {
        let file = auth_file(&[("https://registry.example.com", "YWJjOmRlZg==")]);
        assert_eq!(
            lookup(&file, "registry.example.com").as_deref(),
            Some("YWJjOmRlZg==")
        );
    }

    #[test]
    fn lookup_hub_legacy_keys() {
        let file = auth_file(&[("https://index.docker.io/v1/", "aHViOnNlY3JldA==")]);
        assert_eq!(
            lookup(&file, DEFAULT_REGISTRY).as_deref(),
            Some("aHViOnNlY3JldA==")
        );
        // Legacy keys only apply to the hub.
        assert_eq!(lookup(&file, "ghcr.io"), None);
    }

    #[test]
    fn lookup_ignores_empty_auth() {
        let file = auth_file(&[("ghcr.io", "")]);
        assert_eq!(lookup(&file, "ghcr.io"), None);
    }

    #[test]
    fn decode_splits_user_and_password() {
        let creds = decode("ghcr.io", &encode("user:pa:ss")).unwrap();
        assert_eq!(creds.username.as_deref(), Some("user"));
        // Everything after the first colon is the password.
        assert_eq!(creds.password.as_deref(), Some("pa:ss"));
        assert_eq!(creds.serveraddress.as_deref(), Some("ghcr.io"));
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(decode("ghcr.io", "%%%not-base64%%%").is_none());
        assert!(decode("ghcr.io", &encode("no-colon-here")).is_none());
    }

    #[test]
    fn auth_from_file_reads_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"auths": {{"ghcr.io": {{"auth": "{}"}}}}}}"#,
            encode("me:secret")
        )
        .unwrap();

        assert_eq!(
            auth_from_file(file.path(), "ghcr.io").as_deref(),
            Some(encode("me:secret").as_str())
        );
        assert_eq!(auth_from_file(file.path(), "quay.io"), None);
    }

    #[test]
    fn auth_from_file_skips_unparseable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert_eq!(auth_from_file(file.path(), "ghcr.io"), None);
    }

    #[test]
    fn explicit_secret_path_is_first_candidate() {
        let paths = candidate_paths(Some(Path::new("/run/secrets/registry")));
        assert_eq!(paths[0], PathBuf::from("/run/secrets/registry"));
        assert_eq!(
            paths.last().unwrap(),
            &PathBuf::from("/root/.docker/config.json")
        );
    }
}
