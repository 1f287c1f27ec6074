//! Config file schema.

use std::{path::PathBuf, time::Duration};

use {
    anyhow::{Context, Result, bail},
    serde::{Deserialize, Serialize},
    url::Url,
};

/// Top-level client configuration (`folio.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolioConfig {
    /// Base URL of the REST API, e.g. `http://localhost:8000`.
    pub api_url: String,

    /// Transactions WebSocket endpoint. The access token is appended as `?token=`.
    pub realtime_url: String,

    /// Per-request timeout for REST calls.
    pub request_timeout_secs: u64,

    /// How long a WebSocket open may take before the attempt counts as failed.
    pub connect_timeout_secs: u64,

    /// Fixed delay before reconnecting after an unintentional close.
    pub reconnect_delay_secs: u64,

    /// Upper bound for callers waiting on another caller's initialization.
    pub init_wait_timeout_secs: u64,

    /// Where tokens and the selected account are persisted. Defaults to the
    /// platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,
}

impl Default for FolioConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            realtime_url: "ws://localhost:8000/ws/transactions/".into(),
            request_timeout_secs: 30,
            connect_timeout_secs: 3,
            reconnect_delay_secs: 3,
            init_wait_timeout_secs: 10,
            storage_path: None,
        }
    }
}

impl FolioConfig {
    /// Parse a TOML document.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).context("invalid folio config")
    }

    /// Check URLs and timeouts.
    pub fn validate(&self) -> Result<()> {
        let api = Url::parse(&self.api_url)
            .with_context(|| format!("invalid api_url: {}", self.api_url))?;
        if !matches!(api.scheme(), "http" | "https") {
            bail!("api_url must be http or https, got {}", api.scheme());
        }

        let realtime = Url::parse(&self.realtime_url)
            .with_context(|| format!("invalid realtime_url: {}", self.realtime_url))?;
        if !matches!(realtime.scheme(), "ws" | "wss") {
            bail!("realtime_url must be ws or wss, got {}", realtime.scheme());
        }

        if self.connect_timeout_secs == 0 {
            bail!("connect_timeout_secs must be greater than zero");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn realtime_url(&self) -> Result<Url> {
        Url::parse(&self.realtime_url).context("invalid realtime_url")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn init_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.init_wait_timeout_secs)
    }
}
