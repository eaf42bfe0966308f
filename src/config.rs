//! Configuration loading.
//!
//! All options are read from `STREAMGATE_*` environment variables on top of
//! built-in defaults. Nothing is written back; the only durable state the
//! gateway keeps is the per-identity auth blobs (see [`crate::session`]).

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants;

/// Runtime configuration for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP frontend binds to.
    pub bind_addr: String,
    /// Port the HTTP frontend listens on.
    pub port: u16,
    /// Upstream application id.
    pub api_id: i32,
    /// Upstream application hash.
    pub api_hash: String,
    /// Primary bot token.
    pub bot_token: String,
    /// Channel id the bot forwards files into.
    pub storage_channel_id: i64,
    /// Public prefix used when building watch/download links.
    pub public_url: String,
    /// Handle of the bot users talk to; reported on the status page.
    pub bot_handle: String,
    /// Whether extra client identities are spun up for load balancing.
    pub multi_client: bool,
    /// Bot tokens for the extra identities (ignored unless `multi_client`).
    pub extra_bot_tokens: Vec<String>,
    /// `dc_id → host:port` addresses of the upstream datacenters.
    pub upstream_addrs: HashMap<u32, String>,
    /// Home datacenter for freshly authorized identities.
    pub home_dc: u32,
    /// Directory holding persisted per-identity auth blobs.
    pub session_dir: PathBuf,
    /// Optional path to the watch-page HTML template.
    pub template_path: Option<PathBuf>,
    /// Concurrent chunk fetches admitted per datacenter.
    pub max_streams_per_dc: usize,
    /// Total concurrent streams across all identities.
    pub global_stream_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        let session_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("streamgate");
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 8080,
            api_id: 0,
            api_hash: String::new(),
            bot_token: String::new(),
            storage_channel_id: 0,
            public_url: "http://localhost:8080/".into(),
            bot_handle: "streamgate_bot".into(),
            multi_client: false,
            extra_bot_tokens: Vec::new(),
            upstream_addrs: HashMap::new(),
            home_dc: 2,
            session_dir,
            template_path: None,
            max_streams_per_dc: constants::MAX_STREAMS_PER_DC,
            global_stream_limit: constants::GLOBAL_STREAM_LIMIT,
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a set variable fails to parse, or when a
    /// required credential (`STREAMGATE_API_ID`, `STREAMGATE_API_HASH`,
    /// `STREAMGATE_BOT_TOKEN`, `STREAMGATE_STORAGE_CHANNEL_ID`) is missing.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("STREAMGATE_BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Ok(v) = std::env::var("STREAMGATE_PORT") {
            config.port = v.parse().context("STREAMGATE_PORT is not a port")?;
        }
        config.api_id = std::env::var("STREAMGATE_API_ID")
            .context("STREAMGATE_API_ID is not set")?
            .parse()
            .context("STREAMGATE_API_ID is not a number")?;
        config.api_hash =
            std::env::var("STREAMGATE_API_HASH").context("STREAMGATE_API_HASH is not set")?;
        config.bot_token =
            std::env::var("STREAMGATE_BOT_TOKEN").context("STREAMGATE_BOT_TOKEN is not set")?;
        config.storage_channel_id = std::env::var("STREAMGATE_STORAGE_CHANNEL_ID")
            .context("STREAMGATE_STORAGE_CHANNEL_ID is not set")?
            .parse()
            .context("STREAMGATE_STORAGE_CHANNEL_ID is not a number")?;

        if let Ok(v) = std::env::var("STREAMGATE_PUBLIC_URL") {
            config.public_url = v;
        }
        if let Ok(v) = std::env::var("STREAMGATE_BOT_HANDLE") {
            config.bot_handle = v.trim_start_matches('@').to_string();
        }
        if let Ok(v) = std::env::var("STREAMGATE_MULTI_CLIENT") {
            config.multi_client = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("STREAMGATE_CLIENT_BOT_TOKENS") {
            config.extra_bot_tokens = v
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(v) = std::env::var("STREAMGATE_UPSTREAM_ADDRS") {
            config.upstream_addrs = parse_addr_map(&v)?;
        }
        if let Ok(v) = std::env::var("STREAMGATE_HOME_DC") {
            config.home_dc = v.parse().context("STREAMGATE_HOME_DC is not a dc id")?;
        }
        if let Ok(v) = std::env::var("STREAMGATE_SESSION_DIR") {
            config.session_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STREAMGATE_TEMPLATE_PATH") {
            config.template_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("STREAMGATE_MAX_STREAMS_PER_DC") {
            config.max_streams_per_dc = v
                .parse()
                .context("STREAMGATE_MAX_STREAMS_PER_DC is not a number")?;
        }
        if let Ok(v) = std::env::var("STREAMGATE_GLOBAL_STREAM_LIMIT") {
            config.global_stream_limit = v
                .parse()
                .context("STREAMGATE_GLOBAL_STREAM_LIMIT is not a number")?;
        }

        Ok(config)
    }

    /// All bot tokens that get a client identity, primary first.
    pub fn client_tokens(&self) -> Vec<String> {
        let mut tokens = vec![self.bot_token.clone()];
        if self.multi_client {
            tokens.extend(self.extra_bot_tokens.iter().cloned());
        }
        tokens
    }
}

/// Parse `1=host:port,2=host:port` into a dc address map.
fn parse_addr_map(raw: &str) -> Result<HashMap<u32, String>> {
    let mut map = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (dc, addr) = entry
            .split_once('=')
            .with_context(|| format!("upstream address entry '{entry}' is not dc=addr"))?;
        let dc: u32 = dc
            .trim()
            .parse()
            .with_context(|| format!("'{dc}' is not a dc id"))?;
        map.insert(dc, addr.trim().to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_stream_limits() {
        let config = Config::default();
        assert_eq!(config.max_streams_per_dc, 2);
        assert_eq!(config.global_stream_limit, 10);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn addr_map_parses() {
        let map = parse_addr_map("1=dc1.example:4000, 2=dc2.example:4000").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&2], "dc2.example:4000");
    }

    #[test]
    fn addr_map_rejects_missing_separator() {
        assert!(parse_addr_map("1dc1.example:4000").is_err());
    }

    #[test]
    fn single_client_ignores_extra_tokens() {
        let config = Config {
            bot_token: "a".into(),
            extra_bot_tokens: vec!["b".into()],
            multi_client: false,
            ..Config::default()
        };
        assert_eq!(config.client_tokens(), vec!["a".to_string()]);
    }
}
