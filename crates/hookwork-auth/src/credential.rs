//! Stored provider credentials and the stores that persist them.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A credential issued for one provider.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    #[serde(rename = "oauth")]
    OAuth {
        #[serde(serialize_with = "serialize_secret")]
        access: Secret<String>,
        #[serde(
            default,
            serialize_with = "serialize_option_secret",
            skip_serializing_if = "Option::is_none"
        )]
        refresh: Option<Secret<String>>,
        /// Unix timestamp (seconds) when the access token expires.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<i64>,
    },
    Api {
        #[serde(serialize_with = "serialize_secret")]
        key: Secret<String>,
    },
}

impl Credential {
    pub fn api(key: impl Into<String>) -> Self {
        Self::Api {
            key: Secret::new(key.into()),
        }
    }

    pub fn oauth(
        access: impl Into<String>,
        refresh: Option<String>,
        expires_at: Option<i64>,
    ) -> Self {
        Self::OAuth {
            access: Secret::new(access.into()),
            refresh: refresh.map(Secret::new),
            expires_at,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::OAuth { .. } => "oauth",
            Self::Api { .. } => "api",
        }
    }

    /// The access token or API key.
    pub fn secret(&self) -> &str {
        match self {
            Self::OAuth { access, .. } => access.expose_secret(),
            Self::Api { key } => key.expose_secret(),
        }
    }

    pub fn refresh_token(&self) -> Option<&str> {
        match self {
            Self::OAuth { refresh, .. } => refresh.as_ref().map(|r| r.expose_secret().as_str()),
            Self::Api { .. } => None,
        }
    }

    /// API keys never expire; OAuth tokens without an expiry are treated as valid.
    pub fn is_expired_at(&self, now: i64) -> bool {
        match self {
            Self::OAuth {
                expires_at: Some(at),
                ..
            } => *at <= now,
            _ => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OAuth {
                refresh,
                expires_at,
                ..
            } => f
                .debug_struct("OAuth")
                .field("access", &"[REDACTED]")
                .field("refresh", &refresh.as_ref().map(|_| "[REDACTED]"))
                .field("expires_at", expires_at)
                .finish(),
            Self::Api { .. } => f.debug_struct("Api").field("key", &"[REDACTED]").finish(),
        }
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// Persistence for provider credentials, keyed by provider id.
pub trait CredentialStore: Send + Sync {
    fn load(&self, provider: &str) -> Result<Option<Credential>>;
    fn save(&self, provider: &str, credential: &Credential) -> Result<()>;
    fn remove(&self, provider: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<String>>;
}

/// JSON file of `provider -> credential`, written with `0600` permissions.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Credential>> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => serde_json::from_str(&data).with_context(|| {
                format!("Failed to parse credential file {}", self.path.display())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to read credential file {}", self.path.display())
            }),
        }
    }

    fn write_all(&self, map: &BTreeMap<String, Credential>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, provider: &str) -> Result<Option<Credential>> {
        let credential = self.read_all()?.remove(provider);
        debug!(
            path = %self.path.display(),
            provider,
            found = credential.is_some(),
            "Credential lookup"
        );
        Ok(credential)
    }

    fn save(&self, provider: &str, credential: &Credential) -> Result<()> {
        let mut map = self.read_all()?;
        map.insert(provider.to_string(), credential.clone());
        self.write_all(&map)?;
        info!(path = %self.path.display(), provider, kind = credential.kind(), "Credential saved");
        Ok(())
    }

    fn remove(&self, provider: &str) -> Result<()> {
        let mut map = self.read_all()?;
        if map.remove(provider).is_some() {
            self.write_all(&map)?;
            info!(path = %self.path.display(), provider, "Credential removed");
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.read_all()?.into_keys().collect())
    }
}

/// In-process store, used by tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Credential>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, provider: &str) -> Result<Option<Credential>> {
        Ok(self.entries().get(provider).cloned())
    }

    fn save(&self, provider: &str, credential: &Credential) -> Result<()> {
        self.entries()
            .insert(provider.to_string(), credential.clone());
        Ok(())
    }

    fn remove(&self, provider: &str) -> Result<()> {
        self.entries().remove(provider);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut providers: Vec<String> = self.entries().keys().cloned().collect();
        providers.sort();
        Ok(providers)
    }
}
