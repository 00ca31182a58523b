//! Configuration loading for agentrelay.
//!
//! Settings are layered: built-in defaults, then an optional JSON file
//! (`~/.agentrelay/settings.json`), then environment variables. The CLI
//! applies its own flags on top of the loaded value.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Secret shipped as the default; never meant for real deployments.
pub const DEFAULT_AUTH_SECRET: &str = "super_secret_key_123";

pub const ENV_SERVER_HOST: &str = "SERVER_HOST";
pub const ENV_SERVER_PORT: &str = "SERVER_PORT";
pub const ENV_AUTH_SECRET: &str = "AGENT_AUTH_SECRET";
pub const ENV_SERVER_URI: &str = "SERVER_URI";

/// Get the agentrelay home directory (~/.agentrelay).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".agentrelay"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Relay server settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RelaySettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_auth_secret")]
    pub auth_secret: String,

    /// Reject routed messages whose `sender_id` is not the session's own identity.
    #[serde(default = "default_bind_sender_identity")]
    pub bind_sender_identity: bool,

    /// Capacity of each connection's outbound queue.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_auth_secret() -> String {
    DEFAULT_AUTH_SECRET.to_string()
}

fn default_bind_sender_identity() -> bool {
    true
}

fn default_outbound_buffer() -> usize {
    1024
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_secret: default_auth_secret(),
            bind_sender_identity: default_bind_sender_identity(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl RelaySettings {
    /// Listen address in `host:port` form.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the process is running with the shipped default secret.
    pub fn uses_default_secret(&self) -> bool {
        self.auth_secret == DEFAULT_AUTH_SECRET
    }

    /// Apply `SERVER_HOST`, `SERVER_PORT` and `AGENT_AUTH_SECRET` overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_SERVER_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_SERVER_PORT) {
            self.port = port.trim().parse().map_err(|_| {
                Error::Config(format!("{} is not a valid port: '{}'", ENV_SERVER_PORT, port))
            })?;
        }
        if let Some(secret) = lookup(ENV_AUTH_SECRET) {
            self.auth_secret = secret;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.auth_secret.is_empty() {
            return Err(Error::Config("auth_secret must not be empty".to_string()));
        }
        if self.outbound_buffer == 0 {
            return Err(Error::Config("outbound_buffer must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Load relay settings from `path` (or the default settings file), then the environment.
///
/// A missing file is not an error; defaults are used instead.
pub fn load_relay_settings(path: Option<&Path>) -> Result<RelaySettings> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => get_settings_path()?,
    };

    let mut settings = read_settings_file(&path)?;
    settings.apply_env()?;
    settings.validate()?;

    if settings.uses_default_secret() {
        tracing::warn!(
            "Using default auth secret. Set {} before exposing the relay.",
            ENV_AUTH_SECRET
        );
    }

    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<RelaySettings> {
    if !path.exists() {
        tracing::debug!("No settings file at {}, using defaults", path.display());
        return Ok(RelaySettings::default());
    }

    let content = std::fs::read_to_string(path)?;
    let settings: RelaySettings = serde_json::from_str(&content)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Agent front-end settings.
#[derive(Clone, Debug)]
pub struct AgentSettings {
    pub server_uri: String,
    pub auth_token: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            server_uri: "ws://localhost:8765".to_string(),
            auth_token: DEFAULT_AUTH_SECRET.to_string(),
        }
    }
}
