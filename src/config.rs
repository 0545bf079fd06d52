// src/config.rs

//! Proxy configuration: a TOML file plus environment overrides.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use url::Url;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// The port the proxy listens on for client connections.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// The initial upstream endpoint. Mutated at runtime only by a completed
/// promotion; the config is never written back.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_host")]
    pub host: String,
    #[serde(default = "default_upstream_port")]
    pub port: u16,
    #[serde(default)]
    pub auth: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: default_upstream_host(),
            port: default_upstream_port(),
            auth: None,
        }
    }
}

fn default_port() -> u16 {
    7878
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_upstream_host() -> String {
    "127.0.0.1".to_string()
}
fn default_upstream_port() -> u16 {
    6379
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file \"{path}\""))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file \"{path}\""))
    }

    /// `PORT` overrides the listen port. `REDIS_URL`
    /// (`redis://[:password@]host:port`) overrides the upstream endpoint;
    /// its password, when present, becomes the AUTH password.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            self.port = port
                .parse()
                .map_err(|_| anyhow!("invalid PORT value: {port}"))?;
        }
        if let Ok(raw) = std::env::var("REDIS_URL") {
            let url = Url::parse(&raw).context("invalid REDIS_URL")?;
            self.upstream.host = url
                .host_str()
                .ok_or_else(|| anyhow!("REDIS_URL has no host"))?
                .to_string();
            self.upstream.port = url.port().unwrap_or_else(default_upstream_port);
            self.upstream.auth = url.password().map(str::to_string);
        }
        Ok(())
    }
}
