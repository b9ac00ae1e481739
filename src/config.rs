//! Configuration management

use std::{path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default gateway
pub const DEFAULT_GATEWAY_URL: &str = "https://dashboard.agenticfabriq.com";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before anything else reads the environment.
    /// Paths support ~ expansion; later files override earlier ones.
    pub env_files: Vec<String>,
    /// Gateway base URL
    pub gateway_url: String,
    /// Identity provider settings
    pub identity: IdentityConfig,
    /// Outbound HTTP behaviour
    pub http: HttpConfig,
    /// Tool-connection polling
    pub connections: ConnectionsConfig,
    /// Local state
    pub storage: StorageConfig,
    /// Default page size for listings (1-100)
    pub page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            identity: IdentityConfig::default(),
            http: HttpConfig::default(),
            connections: ConnectionsConfig::default(),
            storage: StorageConfig::default(),
            page_size: 20,
        }
    }
}

/// Identity provider (Keycloak) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Keycloak base URL
    pub keycloak_url: String,
    /// Realm holding the CLI client
    pub realm: String,
    /// Public client id used for the PKCE flow
    pub client_id: String,
    /// Local callback port (0 picks a free port)
    pub callback_port: u16,
    /// Upper bound on waiting for the browser redirect
    #[serde(with = "humantime_serde")]
    pub login_timeout: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            keycloak_url: "https://auth.agenticfabriq.com".to_string(),
            realm: "agentic-fabric".to_string(),
            client_id: "afctl".to_string(),
            callback_port: 8089,
            login_timeout: Duration::from_secs(300),
        }
    }
}

impl IdentityConfig {
    fn endpoint(&self, keycloak_url: Option<&str>, leaf: &str) -> String {
        let base = keycloak_url.unwrap_or(&self.keycloak_url).trim_end_matches('/');
        format!(
            "{base}/realms/{}/protocol/openid-connect/{leaf}",
            self.realm
        )
    }

    /// Authorization endpoint, optionally against an overriding Keycloak URL
    #[must_use]
    pub fn authorization_endpoint(&self, keycloak_url: Option<&str>) -> String {
        self.endpoint(keycloak_url, "auth")
    }

    /// Token endpoint, optionally against an overriding Keycloak URL
    #[must_use]
    pub fn token_endpoint(&self, keycloak_url: Option<&str>) -> String {
        self.endpoint(keycloak_url, "token")
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retries after the first attempt (transient failures only)
    pub retries: u32,
    /// Base delay; attempt `n` waits `backoff_factor * 2^n`
    #[serde(with = "humantime_serde")]
    pub backoff_factor: Duration,
    /// Cap on a single backoff delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 3,
            backoff_factor: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// OAuth completion polling for tool connections
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    /// Interval between completion checks
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Ceiling on the whole poll
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(120),
        }
    }
}

/// Local state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding tokens, application configs and the connection registry
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

/// `~/.af`, or `./.af` when no home directory is known
#[must_use]
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".af")
}

impl Config {
    /// Load configuration from defaults, an optional YAML file and `FABRIC_*` variables
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or yields out-of-range values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("FABRIC_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.storage.state_dir = expand_home(&config.storage.state_dir.to_string_lossy());
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty gateway URL, a page size outside
    /// 1-100 or a zero poll interval.
    pub fn validate(&self) -> Result<()> {
        if self.gateway_url.trim().is_empty() {
            return Err(Error::Config("gateway_url must not be empty".into()));
        }
        if !(1..=100).contains(&self.page_size) {
            return Err(Error::Config(format!(
                "page_size must be between 1 and 100, got {}",
                self.page_size
            )));
        }
        if self.connections.poll_interval.is_zero() {
            return Err(Error::Config("connections.poll_interval must be > 0".into()));
        }
        Ok(())
    }

    /// Gateway URL without a trailing slash
    #[must_use]
    pub fn gateway_base(&self) -> &str {
        self.gateway_url.trim_end_matches('/')
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = expand_home(path_str);
            if path.exists() {
                match dotenvy::from_path(&path) {
                    Ok(()) => tracing::info!(path = %path.display(), "Loaded env file"),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to load env file");
                    }
                }
            } else {
                tracing::debug!(path = %path.display(), "Env file not found (skipped)");
            }
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(raw)
}

/// Human-readable Duration (de)serialization ("30s", "2m", "250ms")
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration, preferring the coarsest exact unit
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let text = if duration.subsec_millis() != 0 {
            format!("{}ms", duration.as_millis())
        } else if duration.as_secs() != 0 && duration.as_secs() % 60 == 0 {
            format!("{}m", duration.as_secs() / 60)
        } else {
            format!("{}s", duration.as_secs())
        };
        serializer.serialize_str(&text)
    }

    /// Deserialize "30s", "5m", "100ms" or bare seconds
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(s.trim()).map_err(serde::de::Error::custom)
    }

    /// Parse a duration string
    ///
    /// # Errors
    ///
    /// Returns the parse error text.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let num = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid duration '{s}': {e}"))
        };

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            num(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            num(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            num(mins).map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            num(hours).map(|h| Duration::from_secs(h * 3600))
        } else {
            num(s).map(Duration::from_secs)
        }
    }
}
