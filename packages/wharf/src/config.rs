use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / wharf.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   wharf.toml:      [sessions]
//                    max_sessions = 8
//
//   env var:         WHARF_SESSIONS__MAX_SESSIONS=8   (double underscore = nesting)
//
//   CLI flags (--host/--port) override both.

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub sessions: SessionFileConfig,
    #[serde(default)]
    pub watcher: WatcherFileConfig,
    #[serde(default)]
    pub gateway: GatewayFileConfig,
    #[serde(default)]
    pub shutdown: ShutdownFileConfig,
}

/// Listener settings (lives under `[server]` in wharf.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Session lifecycle and buffer tuning (lives under `[sessions]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// Quota on concurrently active (non-terminated) sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Inject the agent launch command shortly after the shell settles.
    #[serde(default = "default_auto_launch")]
    pub auto_launch: bool,
    /// Line-history ring capacity, in lines, per session.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// Raw replay buffer cap, in bytes, per session.
    #[serde(default = "default_replay_max_bytes")]
    pub replay_max_bytes: usize,
    /// Idle window before a pending partial line is flushed.
    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,
    /// How long a terminated session stays queryable before purge.
    #[serde(default = "default_grace_window_ms")]
    pub grace_window_ms: u64,
    /// Grace between the graceful kill and the forced fallback kill.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// Shell settle time before the auto-launch command is injected.
    #[serde(default = "default_launch_delay_ms")]
    pub launch_delay_ms: u64,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            auto_launch: default_auto_launch(),
            ring_capacity: default_ring_capacity(),
            replay_max_bytes: default_replay_max_bytes(),
            flush_debounce_ms: default_flush_debounce_ms(),
            grace_window_ms: default_grace_window_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            launch_delay_ms: default_launch_delay_ms(),
        }
    }
}

/// Directory watcher tuning (lives under `[watcher]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatcherFileConfig {
    /// Burst coalescing window for filesystem change events.
    #[serde(default = "default_watch_debounce_ms")]
    pub debounce_ms: u64,
    /// Divisor deriving the context estimate from the file count.
    #[serde(default = "default_file_ratio")]
    pub file_ratio: u64,
}

impl Default for WatcherFileConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_watch_debounce_ms(),
            file_ratio: default_file_ratio(),
        }
    }
}

/// WebSocket gateway tuning (lives under `[gateway]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayFileConfig {
    /// Ping interval; a connection silent past one interval is dropped.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Ceiling on `read-file` responses.
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,
}

impl Default for GatewayFileConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            max_read_bytes: default_max_read_bytes(),
        }
    }
}

/// Shutdown drain bound (lives under `[shutdown]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShutdownFileConfig {
    /// Hard cap on the kill-all/unwatch-all drain before forced exit.
    #[serde(default = "default_drain_secs")]
    pub drain_secs: u64,
}

impl Default for ShutdownFileConfig {
    fn default() -> Self {
        Self {
            drain_secs: default_drain_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8600
}
fn default_max_sessions() -> usize {
    8
}
fn default_auto_launch() -> bool {
    true
}
fn default_ring_capacity() -> usize {
    2000
}
fn default_replay_max_bytes() -> usize {
    1024 * 1024
}
fn default_flush_debounce_ms() -> u64 {
    100
}
fn default_grace_window_ms() -> u64 {
    5_000
}
fn default_kill_grace_ms() -> u64 {
    3_000
}
fn default_launch_delay_ms() -> u64 {
    1_500
}
fn default_watch_debounce_ms() -> u64 {
    300
}
fn default_file_ratio() -> u64 {
    10
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_max_read_bytes() -> u64 {
    1024 * 1024
}
fn default_drain_secs() -> u64 {
    10
}

/// Layer defaults, the optional config file, and `WHARF_*` env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `WHARF_SESSIONS__MAX_SESSIONS=8`  →  `sessions.max_sessions = 8`
///   `WHARF_GATEWAY__HEARTBEAT_SECS=10`  →  `gateway.heartbeat_secs = 10`
pub fn load_config(config_file: Option<&Path>) -> Result<FileConfig> {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let toml_path = config_file.unwrap_or_else(|| Path::new("wharf.toml"));

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(toml_path))
        .merge(Env::prefixed("WHARF_").split("__"))
        .extract()
        .context("invalid configuration")
}

/// Resolved session tuning (runtime view with real `Duration`s).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub auto_launch: bool,
    pub ring_capacity: usize,
    pub replay_max_bytes: usize,
    pub flush_debounce: Duration,
    pub grace_window: Duration,
    pub kill_grace: Duration,
    pub launch_delay: Duration,
}

impl SessionConfig {
    pub fn from_file(fc: &SessionFileConfig) -> Self {
        Self {
            max_sessions: fc.max_sessions,
            auto_launch: fc.auto_launch,
            ring_capacity: fc.ring_capacity,
            replay_max_bytes: fc.replay_max_bytes,
            flush_debounce: Duration::from_millis(fc.flush_debounce_ms),
            grace_window: Duration::from_millis(fc.grace_window_ms),
            kill_grace: Duration::from_millis(fc.kill_grace_ms),
            launch_delay: Duration::from_millis(fc.launch_delay_ms),
        }
    }
}

/// Resolved watcher tuning.
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    pub debounce: Duration,
    pub file_ratio: u64,
}

impl WatcherConfig {
    pub fn from_file(fc: &WatcherFileConfig) -> Self {
        Self {
            debounce: Duration::from_millis(fc.debounce_ms),
            file_ratio: fc.file_ratio.max(1),
        }
    }
}

/// Resolved gateway tuning.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub heartbeat: Duration,
    pub max_read_bytes: u64,
}

impl GatewayConfig {
    pub fn from_file(fc: &GatewayFileConfig) -> Self {
        Self {
            heartbeat: Duration::from_secs(fc.heartbeat_secs),
            max_read_bytes: fc.max_read_bytes,
        }
    }
}
