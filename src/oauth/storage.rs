//! Token Storage
//!
//! Persists the interactive identity token and application configs so they
//! survive across CLI invocations. The file store writes everything through
//! [`persist::write_json`](crate::persist::write_json): atomic and owner-only.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::token::IdentityToken;
use crate::applications::ApplicationConfig;
use crate::{Error, Result, persist};

/// Storage for identity tokens and application secrets
pub trait TokenStore: Send + Sync {
    /// Stored identity token, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the stored token cannot be read.
    fn load_identity(&self) -> Result<Option<IdentityToken>>;

    /// Replace the identity token
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be written.
    fn save_identity(&self, token: &IdentityToken) -> Result<()>;

    /// Remove the identity token; `Ok(false)` when none was stored
    ///
    /// # Errors
    ///
    /// Returns an error if the token exists but cannot be removed.
    fn clear_identity(&self) -> Result<bool>;

    /// One application config
    ///
    /// # Errors
    ///
    /// Returns an error if the config exists but cannot be read.
    fn load_application(&self, app_id: &str) -> Result<Option<ApplicationConfig>>;

    /// Persist an application config under its app id
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be written.
    fn save_application(&self, config: &ApplicationConfig) -> Result<()>;

    /// Every stored application config, ordered by app id
    ///
    /// # Errors
    ///
    /// Returns an error if the application directory cannot be read.
    fn list_applications(&self) -> Result<Vec<ApplicationConfig>>;

    /// Remove an application config; `Ok(false)` when none was stored
    ///
    /// # Errors
    ///
    /// Returns an error if the config exists but cannot be removed.
    fn delete_application(&self, app_id: &str) -> Result<bool>;
}

/// File-backed store rooted at the state directory
///
/// Layout: `tokens.json` and `applications/<app_id>.json`.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    base_dir: PathBuf,
}

impl FileTokenStore {
    /// Store rooted at `base_dir` (created lazily on first write)
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root directory
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn identity_path(&self) -> PathBuf {
        self.base_dir.join("tokens.json")
    }

    fn applications_dir(&self) -> PathBuf {
        self.base_dir.join("applications")
    }

    fn application_path(&self, app_id: &str) -> Result<PathBuf> {
        if app_id.is_empty()
            || app_id.starts_with('.')
            || app_id.contains(['/', '\\'])
            || app_id.chars().any(char::is_whitespace)
        {
            return Err(Error::validation(app_id, "not a valid application id"));
        }
        Ok(self.applications_dir().join(format!("{app_id}.json")))
    }
}

impl TokenStore for FileTokenStore {
    fn load_identity(&self) -> Result<Option<IdentityToken>> {
        let token: Option<IdentityToken> = persist::read_json(&self.identity_path())?;
        if token.is_none() {
            debug!("No stored identity token");
        }
        Ok(token)
    }

    fn save_identity(&self, token: &IdentityToken) -> Result<()> {
        persist::write_json(&self.identity_path(), token)?;
        info!(expires_at = %token.expires_at, "Saved identity token");
        Ok(())
    }

    fn clear_identity(&self) -> Result<bool> {
        persist::remove(&self.identity_path())
    }

    fn load_application(&self, app_id: &str) -> Result<Option<ApplicationConfig>> {
        persist::read_json(&self.application_path(app_id)?)
    }

    fn save_application(&self, config: &ApplicationConfig) -> Result<()> {
        persist::write_json(&self.application_path(&config.app_id)?, config)?;
        info!(app_id = %config.app_id, "Saved application config");
        Ok(())
    }

    fn list_applications(&self) -> Result<Vec<ApplicationConfig>> {
        let dir = self.applications_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut configs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_config = path.extension().is_some_and(|ext| ext == "json")
                && !path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if !is_config {
                continue;
            }
            match persist::read_json::<ApplicationConfig>(&path) {
                Ok(Some(config)) => configs.push(config),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable application config");
                }
            }
        }
        configs.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        Ok(configs)
    }

    fn delete_application(&self, app_id: &str) -> Result<bool> {
        let removed = persist::remove(&self.application_path(app_id)?)?;
        if removed {
            info!(app_id = %app_id, "Deleted application config");
        }
        Ok(removed)
    }
}

/// In-memory store for tests and embedded SDK use
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    identity: RwLock<Option<IdentityToken>>,
    applications: RwLock<BTreeMap<String, ApplicationConfig>>,
}

impl MemoryTokenStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load_identity(&self) -> Result<Option<IdentityToken>> {
        Ok(self.identity.read().clone())
    }

    fn save_identity(&self, token: &IdentityToken) -> Result<()> {
        *self.identity.write() = Some(token.clone());
        Ok(())
    }

    fn clear_identity(&self) -> Result<bool> {
        Ok(self.identity.write().take().is_some())
    }

    fn load_application(&self, app_id: &str) -> Result<Option<ApplicationConfig>> {
        Ok(self.applications.read().get(app_id).cloned())
    }

    fn save_application(&self, config: &ApplicationConfig) -> Result<()> {
        self.applications
            .write()
            .insert(config.app_id.clone(), config.clone());
        Ok(())
    }

    fn list_applications(&self) -> Result<Vec<ApplicationConfig>> {
        Ok(self.applications.read().values().cloned().collect())
    }

    fn delete_application(&self, app_id: &str) -> Result<bool> {
        Ok(self.applications.write().remove(app_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn token() -> IdentityToken {
        IdentityToken {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            token_type: "Bearer".into(),
            expires_at: Utc::now() + chrono::Duration::minutes(5),
            claims: super::super::TokenClaims::default(),
            token_endpoint: None,
        }
    }

    fn app(id: &str) -> ApplicationConfig {
        ApplicationConfig {
            app_id: id.into(),
            secret_key: "sk".into(),
            user_id: None,
            tenant_id: None,
            gateway_url: "http://gw".into(),
            created_at: Utc::now(),
            tool_connections: BTreeMap::new(),
            scopes: Vec::new(),
        }
    }

    #[test]
    fn identity_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        assert!(store.load_identity().unwrap().is_none());

        store.save_identity(&token()).unwrap();
        let loaded = store.load_identity().unwrap().unwrap();
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));

        assert!(store.clear_identity().unwrap());
        assert!(!store.clear_identity().unwrap());
    }

    #[test]
    fn applications_are_listed_in_id_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        store.save_application(&app("zeta")).unwrap();
        store.save_application(&app("alpha")).unwrap();
        fs::write(dir.path().join("applications").join("notes.txt"), "x").unwrap();

        let ids: Vec<String> = store
            .list_applications()
            .unwrap()
            .into_iter()
            .map(|a| a.app_id)
            .collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert!(dir.path().join("applications").join("alpha.json").exists());
    }

    #[test]
    fn path_like_app_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        assert!(store.load_application("../etc").is_err());
        assert!(store.load_application("has space").is_err());
    }

    #[test]
    fn memory_store_behaves_like_file_store() {
        let store = MemoryTokenStore::new();
        store.save_application(&app("a")).unwrap();
        assert!(store.load_application("a").unwrap().is_some());
        assert!(store.delete_application("a").unwrap());
        assert!(!store.delete_application("a").unwrap());
    }
}
