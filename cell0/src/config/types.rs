//! Config type definitions, validated with `validator`.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CellConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub meta_agent: MetaAgentConfig,
    /// `CELL0_ALLOW_LOCAL_ADMIN` (default false)
    #[serde(default)]
    pub allow_local_admin: bool,
    /// Comma-separated in env, list in TOML. `CELL0_ADMIN_TOKEN` appends one.
    #[serde(default)]
    pub admin_tokens: Vec<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            storage: StorageConfig::default(),
            meta_agent: MetaAgentConfig::default(),
            allow_local_admin: false,
            admin_tokens: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GatewayConfig {
    /// `CELL0_HOST`, defaults to loopback only.
    #[serde(default = "default_host")]
    pub host: String,
    /// `CELL0_PORT` start of scan range (default 18789..18799 per spec §4.2).
    #[serde(default = "default_port_start")]
    pub port_range_start: u16,
    #[serde(default = "default_port_end")]
    pub port_range_end: u16,
    /// `CELL0_WS_PORT` defaults documented as ambiguous by the spec; we pick
    /// 18789 and make the bound value discoverable via `/api/system/status`.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default = "default_portal_start")]
    pub portal_port_range_start: u16,
    #[serde(default = "default_portal_end")]
    pub portal_port_range_end: u16,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_missed_heartbeats")]
    pub missed_heartbeats_before_close: u32,
    #[serde(default = "default_replay_buffer_size")]
    pub event_replay_buffer_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port_range_start: default_port_start(),
            port_range_end: default_port_end(),
            ws_port: default_ws_port(),
            portal_port_range_start: default_portal_start(),
            portal_port_range_end: default_portal_end(),
            flush_interval_ms: default_flush_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            missed_heartbeats_before_close: default_missed_heartbeats(),
            event_replay_buffer_size: default_replay_buffer_size(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port_start() -> u16 {
    18789
}
fn default_port_end() -> u16 {
    18799
}
fn default_ws_port() -> u16 {
    18789
}
fn default_portal_start() -> u16 {
    18790
}
fn default_portal_end() -> u16 {
    18799
}
fn default_flush_interval_ms() -> u64 {
    1_000
}
fn default_heartbeat_interval_ms() -> u64 {
    15_000
}
fn default_missed_heartbeats() -> u32 {
    3
}
fn default_replay_buffer_size() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> String {
    std::env::var("CELL0_STATE_DIR").unwrap_or_else(|_| ".cell0/state".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MetaAgentConfig {
    /// Cron expression, default every 5 minutes (spec §4.6).
    #[serde(default = "default_cron")]
    pub cron: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetaAgentConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            enabled: true,
        }
    }
}

fn default_cron() -> String {
    "0 */5 * * * *".to_string()
}
fn default_true() -> bool {
    true
}

impl CellConfig {
    /// Apply the §6 env var subset on top of whatever TOML provided.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CELL0_HOST") {
            self.gateway.host = v;
        }
        if let Ok(v) = std::env::var("CELL0_PORT") {
            if let Ok(p) = v.parse() {
                self.gateway.port_range_start = p;
            }
        }
        if let Ok(v) = std::env::var("CELL0_WS_PORT") {
            if let Ok(p) = v.parse() {
                self.gateway.ws_port = p;
            }
        }
        if let Ok(v) = std::env::var("CELL0_STATE_DIR") {
            self.storage.state_dir = v;
        }
        if let Ok(v) = std::env::var("CELL0_ALLOW_LOCAL_ADMIN") {
            self.allow_local_admin = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("CELL0_ADMIN_TOKEN") {
            for tok in v.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if !self.admin_tokens.iter().any(|t| t == tok) {
                    self.admin_tokens.push(tok.to_string());
                }
            }
        }
        if let Ok(v) = std::env::var("CELL0_LOG_LEVEL") {
            self.log_level = v;
        }
    }
}
