//! Server configuration file.

use crate::chart::ChartOptions;
use crate::client::Upstream;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `upstream.api_token`.
pub const API_TOKEN_ENV: &str = "CHRONOSPHERE_API_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportKind::Stdio),
            "http" => Ok(TransportKind::Http),
            other => Err(format!("unknown transport {other:?}, want stdio or http")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub logscale: LogScale,
    #[serde(default)]
    pub chart: Chart,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Log {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for Log {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Server {
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_request_timeout", deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            listen: default_listen(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub loopback: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_token: String::new(),
            loopback: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogScale {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Chart {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub font_path: String,
}

impl Default for Chart {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            font_path: String::new(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_transport() -> TransportKind {
    TransportKind::Stdio
}

fn default_listen() -> String {
    "127.0.0.1:8088".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_api_url() -> String {
    "https://example.chronosphere.io".to_string()
}

fn default_width() -> u32 {
    1024
}

fn default_height() -> u32 {
    768
}

/// `request_timeout = "60s"` style durations.
fn deserialize_duration<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides, then validate.
    pub fn finish(mut self, token_env: Option<String>) -> Result<Self, ConfigError> {
        if let Some(token) = token_env.filter(|t| !t.is_empty()) {
            self.upstream.api_token = token;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.api_url.trim().is_empty() && !self.upstream.loopback {
            return Err(ConfigError::Invalid("upstream.api_url is required".into()));
        }
        if self.chart.width == 0 || self.chart.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "chart size must be non-zero, got {}x{}",
                self.chart.width, self.chart.height
            )));
        }
        if self.server.transport == TransportKind::Http && self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "server.listen {:?} is not a socket address",
                self.server.listen
            )));
        }
        Ok(())
    }

    pub fn upstream(&self) -> Upstream {
        Upstream {
            api_url: self.upstream.api_url.clone(),
            api_token: self.upstream.api_token.clone(),
            logscale_url: self.logscale.url.clone(),
            logscale_token: self.logscale.token.clone(),
            timeout: self.server.request_timeout,
        }
    }

    pub fn chart(&self) -> ChartOptions {
        ChartOptions {
            width: self.chart.width,
            height: self.chart.height,
            ..Default::default()
        }
    }

    pub fn font_path(&self) -> Option<&Path> {
        (!self.chart.font_path.is_empty()).then(|| Path::new(&self.chart.font_path))
    }
}
