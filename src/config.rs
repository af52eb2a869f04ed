//! Configuration loading and management.
//!
//! Configuration comes from an optional TOML file (path as first argument)
//! with environment overrides for the deployment knobs: `PORT`,
//! `WS_ORIGIN_ALLOW` and `LOG_LEVEL`. Every field has a default so the
//! server boots with no file at all.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid environment override {name}: {value}")]
    Env { name: &'static str, value: String },
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Realtime (WebSocket) configuration.
    #[serde(default)]
    pub rtm: RtmConfig,
    /// Protocol limits, advertised via `/meta/capabilities`.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Room policy knobs.
    #[serde(default)]
    pub rooms: RoomsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// TCP port to bind (env: `PORT`).
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

fn default_port() -> u16 {
    8080
}

/// Realtime session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RtmConfig {
    /// Allowed `Origin` values for WS upgrades (env: `WS_ORIGIN_ALLOW`,
    /// comma-separated). Empty list rejects any browser origin; requests
    /// without an `Origin` header (non-browser clients) always pass.
    #[serde(default)]
    pub origin_allow: Vec<String>,
    /// Heartbeat period advertised in `ready` and used by the ping timer.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// Bound of a session's outbound frame buffer. On overflow the session
    /// is closed as a slow consumer.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// RTM ticket lifetime.
    #[serde(default = "default_ticket_ttl_ms")]
    pub ticket_ttl_ms: u64,
}

impl Default for RtmConfig {
    fn default() -> Self {
        Self {
            origin_allow: Vec::new(),
            heartbeat_ms: default_heartbeat_ms(),
            outbound_buffer: default_outbound_buffer(),
            ticket_ttl_ms: default_ticket_ttl_ms(),
        }
    }
}

fn default_heartbeat_ms() -> u64 {
    30_000
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_ticket_ttl_ms() -> u64 {
    60_000
}

/// Protocol limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message text size in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Maximum upload blob size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Maximum attachments per message.
    #[serde(default = "default_max_attachments")]
    pub max_attachments: usize,
    /// Maximum distinct emojis on one message.
    #[serde(default = "default_max_reactions")]
    pub max_reactions_per_message: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: default_max_message_bytes(),
            max_upload_bytes: default_max_upload_bytes(),
            max_attachments: default_max_attachments(),
            max_reactions_per_message: default_max_reactions(),
        }
    }
}

fn default_max_message_bytes() -> usize {
    4000
}

fn default_max_upload_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_max_attachments() -> usize {
    10
}

fn default_max_reactions() -> usize {
    20
}

/// What happens when a room owner tries to leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerLeavePolicy {
    /// Refuse until ownership is transferred.
    Forbid,
    /// Auto-promote the longest-standing admin (or member) to owner.
    Promote,
}

/// Room policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// Owner-leave behavior.
    #[serde(default = "default_owner_leave")]
    pub owner_leave: OwnerLeavePolicy,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self { owner_leave: default_owner_leave() }
    }
}

fn default_owner_leave() -> OwnerLeavePolicy {
    OwnerLeavePolicy::Forbid
}

impl Config {
    /// Load configuration from a TOML file, then apply env overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults plus env overrides; used when no config file is given.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = std::env::var("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Env { name: "PORT", value: port })?;
        }
        if let Ok(origins) = std::env::var("WS_ORIGIN_ALLOW") {
            self.rtm.origin_allow = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }
}
