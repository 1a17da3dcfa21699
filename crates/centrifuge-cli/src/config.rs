//! Client configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (CENTRIFUGE_*)
//! - TOML configuration file

use anyhow::{bail, Context, Result};
use centrifuge_protocol::Credentials;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket endpoint of the server.
    #[serde(default = "default_url")]
    pub url: String,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Channels to subscribe to once connected.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Fetch channel history after each subscription.
    #[serde(default)]
    pub history: bool,

    /// Connection credentials.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Connection credentials.
///
/// Either `token` is given as issued by the application backend, or `secret`
/// is given and the token is signed locally.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_user")]
    pub user: String,

    /// Unix seconds. Defaults to the current time.
    #[serde(default)]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_secret")]
    pub secret: Option<String>,

    /// Connection info, a JSON string.
    #[serde(default)]
    pub info: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_url() -> String {
    std::env::var("CENTRIFUGE_URL")
        .unwrap_or_else(|_| "ws://127.0.0.1:8000/connection/websocket".to_string())
}

fn default_user() -> String {
    std::env::var("CENTRIFUGE_USER").unwrap_or_default()
}

fn default_secret() -> Option<String> {
    std::env::var("CENTRIFUGE_SECRET").ok()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_message_size: default_max_message_size(),
            channels: Vec::new(),
            history: false,
            credentials: CredentialsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            timestamp: None,
            token: None,
            secret: default_secret(),
            info: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("user", &self.user)
            .field("timestamp", &self.timestamp)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("info", &self.info)
            .finish()
    }
}

impl CredentialsConfig {
    /// Build connection credentials, signing a token when none is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if neither a token nor a secret is configured.
    pub fn credentials(&self) -> Result<Credentials> {
        let timestamp = match &self.timestamp {
            Some(timestamp) => timestamp.clone(),
            None => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .context("System clock is before the Unix epoch")?
                .as_secs()
                .to_string(),
        };

        let credentials = match (&self.token, &self.secret) {
            (Some(token), _) => {
                let credentials = Credentials::new(&self.user, timestamp, token);
                match &self.info {
                    Some(info) => credentials.with_info(info),
                    None => credentials,
                }
            }
            (None, Some(secret)) => centrifuge_core::signed_credentials(
                secret,
                &self.user,
                &timestamp,
                self.info.as_deref(),
            ),
            (None, None) => bail!("Either credentials.token or credentials.secret must be set"),
        };

        Ok(credentials)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "centrifuge.toml",
            "/etc/centrifuge/centrifuge.toml",
            "~/.config/centrifuge/centrifuge.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
