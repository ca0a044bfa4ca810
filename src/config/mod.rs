//! Configuration loading

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::TokenPair;
use crate::error::Error;

/// Application configuration (`config.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Spotify application client ID
    pub client_id: Option<String>,
    /// Spotify application client secret
    pub client_secret: Option<String>,
    /// Bootstrap access token (from the authorization snippet)
    pub access_token: Option<String>,
    /// Bootstrap refresh token, used when the token store is empty
    pub refresh_token: Option<String>,
    /// Port of the loopback redirect endpoint
    pub redirect_port: u16,
    /// Seconds between playback polls
    pub update_interval_secs: u64,
    /// Poll at `low_power_interval_secs` instead
    pub low_power_mode: bool,
    pub low_power_interval_secs: u64,
    /// Volume change per up/down command, in percent
    pub volume_step: u8,
    /// Timeout applied to every outbound request
    pub request_timeout_secs: u64,
    /// Token store location (defaults to the platform data directory)
    pub token_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            access_token: None,
            refresh_token: None,
            redirect_port: 8100,
            update_interval_secs: 5,
            low_power_mode: false,
            low_power_interval_secs: 30,
            volume_step: 5,
            request_timeout_secs: 10,
            token_file: None,
        }
    }
}

/// Client credentials of the registered Spotify application.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "spotify-widget", "spotify-widget")
        .context("Could not determine config directory")
}

impl Config {
    /// Default config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load configuration from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Client credentials, or `Error::Configuration` if either is missing.
    pub fn credentials(&self) -> Result<Credentials, Error> {
        let client_id = non_empty(&self.client_id)
            .ok_or_else(|| Error::Configuration("client_id is not set".into()))?;
        let client_secret = non_empty(&self.client_secret)
            .ok_or_else(|| Error::Configuration("client_secret is not set".into()))?;
        Ok(Credentials {
            client_id,
            client_secret,
        })
    }

    /// Refresh token supplied in the config file, if any.
    pub fn bootstrap_pair(&self) -> Option<TokenPair> {
        let refresh_token = non_empty(&self.refresh_token)?;
        Some(TokenPair::new(
            non_empty(&self.access_token).unwrap_or_default(),
            refresh_token,
        ))
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.redirect_port)
    }

    pub fn poll_interval(&self) -> Duration {
        let secs = if self.low_power_mode {
            self.low_power_interval_secs
        } else {
            self.update_interval_secs
        };
        Duration::from_secs(secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Token store path
    pub fn token_path(&self) -> Result<PathBuf> {
        match &self.token_file {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("tokens.json")),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// TOML snippet the operator can paste into `config.toml` after authorizing.
pub fn config_snippet(credentials: &Credentials, pair: &TokenPair) -> String {
    format!(
        "client_id = \"{}\"\nclient_secret = \"{}\"\naccess_token = \"{}\"\nrefresh_token = \"{}\"\n",
        credentials.client_id, credentials.client_secret, pair.access_token, pair.refresh_token
    )
}
