use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use serde::Deserialize;

use crate::reference::DEFAULT_DOMAIN;

/// Docker Hub credentials are stored under the legacy index address.
pub const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Basic { username: String, password: String },
    IdentityToken(String),
}

/// Looks up credentials for a registry domain, e.g. `docker.io` or `ghcr.io`.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self, host: &str) -> Result<Credentials, Error>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousCredentials;

impl CredentialProvider for AnonymousCredentials {
    fn credentials(&self, _host: &str) -> Result<Credentials, Error> {
        Ok(Credentials::Anonymous)
    }
}

/// Fixed in-memory credentials, anonymous for unknown hosts.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    by_host: HashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn with(mut self, host: impl Into<String>, credentials: Credentials) -> Self {
        self.by_host.insert(host.into(), credentials);
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self, host: &str) -> Result<Credentials, Error> {
        Ok(self
            .by_host
            .get(host)
            .cloned()
            .unwrap_or(Credentials::Anonymous))
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    identitytoken: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

/// Reads the `auths` section of a docker CLI `config.json`.
///
/// The file is read once at construction; helpers and credential stores are
/// not consulted.
#[derive(Debug, Default, Clone)]
pub struct DockerConfigCredentials {
    auths: HashMap<String, AuthEntry>,
}

impl DockerConfigCredentials {
    /// `$DOCKER_CONFIG/config.json`, falling back to `$HOME/.docker/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Some(PathBuf::from(dir).join("config.json"));
        }
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".docker").join("config.json"))
    }

    /// Loads `path`; a missing file behaves like an empty one.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<DockerConfigCredentials, Error> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No docker config at {:?}, using anonymous access", path);
            return Ok(DockerConfigCredentials::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content).with_context(|| {
            format!(
                "Attempting to parse docker config from file: {}",
                path.to_string_lossy()
            )
        })
    }

    pub fn parse_str(content: &str) -> Result<DockerConfigCredentials, Error> {
        let config: DockerConfigFile = serde_json::from_str(content)?;
        Ok(DockerConfigCredentials {
            auths: config.auths,
        })
    }

    fn entry_for(&self, host: &str) -> Option<&AuthEntry> {
        let key = if host == DEFAULT_DOMAIN {
            DOCKER_HUB_AUTH_KEY
        } else {
            host
        };
        if let Some(entry) = self.auths.get(key) {
            return Some(entry);
        }
        // Keys are sometimes stored as urls, e.g. `https://ghcr.io/v1/`.
        self.auths
            .iter()
            .find(|(k, _)| strip_to_host(k) == strip_to_host(key))
            .map(|(_, v)| v)
    }
}

fn strip_to_host(key: &str) -> &str {
    let key = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    key.split('/').next().unwrap_or(key)
}

impl CredentialProvider for DockerConfigCredentials {
    fn credentials(&self, host: &str) -> Result<Credentials, Error> {
        let entry = match self.entry_for(host) {
            Some(entry) => entry,
            None => return Ok(Credentials::Anonymous),
        };

        if let Some(token) = entry.identitytoken.as_ref().filter(|t| !t.is_empty()) {
            return Ok(Credentials::IdentityToken(token.clone()));
        }

        if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
            return Ok(Credentials::Basic {
                username: username.clone(),
                password: password.clone(),
            });
        }

        if let Some(auth) = entry.auth.as_ref().filter(|a| !a.is_empty()) {
            use base64::prelude::*;
            let decoded = BASE64_STANDARD
                .decode(auth.trim())
                .with_context(|| format!("Invalid base64 auth entry for {}", host))?;
            let decoded = String::from_utf8(decoded)
                .with_context(|| format!("Auth entry for {} is not utf-8", host))?;
            let (username, password) = decoded
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("Auth entry for {} has no ':' separator", host))?;
            return Ok(Credentials::Basic {
                username: username.to_string(),
                password: password.to_string(),
            });
        }

        Ok(Credentials::Anonymous)
    }
}
