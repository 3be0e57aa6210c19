use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from `~/.padterm/config.toml`.
///
/// Every section is optional in the file; missing keys fall back to the
/// defaults below so a partial file is always valid TOML for this struct.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Config {
    /// Load config from `~/.padterm/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.terminal.validate()?;
        self.bridge.validate()?;
        if self.history.max_entries == 0 {
            return Err(ConfigError::Validation(
                "history.max_entries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        data_dir().join("config.toml")
    }
}

/// `~/.padterm`, or `./.padterm` when no home directory is known.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".padterm")
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// Origins accepted on the terminal WebSocket when none are configured.
/// Each entry also matches itself followed by `:<port>`.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost",
    "https://localhost",
    "http://127.0.0.1",
    "https://127.0.0.1",
    "http://[::1]",
    "https://[::1]",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Browser origins allowed to open a terminal. `"*"` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("server.host must not be empty".into()));
        }
        if self.allowed_origins.iter().any(|o| o.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "server.allowed_origins must not contain empty entries".into(),
            ));
        }
        Ok(())
    }
}

pub fn default_allowed_origins() -> Vec<String> {
    DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect()
}

fn default_server_host() -> String {
    "127.0.0.1".into()
}
fn default_server_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            rows: default_rows(),
            cols: default_cols(),
            term: default_term(),
            working_dir: None,
            max_sessions: default_max_sessions(),
        }
    }
}

impl TerminalConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.shell.trim().is_empty() {
            return Err(ConfigError::Validation("terminal.shell must not be empty".into()));
        }
        if self.rows == 0 || self.cols == 0 {
            return Err(ConfigError::Validation(format!(
                "terminal.rows and terminal.cols must be non-zero (got {}x{})",
                self.rows, self.cols
            )));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Validation(
                "terminal.max_sessions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// `$SHELL` when set, otherwise `/bin/bash`.
pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "/bin/bash".into())
}
fn default_rows() -> u16 {
    24
}
fn default_cols() -> u16 {
    80
}
fn default_term() -> String {
    "xterm-256color".into()
}
fn default_max_sessions() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Upper bound on one wait for an inbound frame.
    #[serde(default = "default_inbound_timeout_ms")]
    pub inbound_timeout_ms: u64,
    /// Fixed delay between loop iterations.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            inbound_timeout_ms: default_inbound_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl BridgeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.inbound_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "bridge.inbound_timeout_ms must be non-zero".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "bridge.poll_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_inbound_timeout_ms() -> u64 {
    50
}
fn default_poll_interval_ms() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: String,
    #[serde(default = "default_history_max")]
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            max_entries: default_history_max(),
        }
    }
}

impl HistoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

fn default_history_path() -> String {
    "~/.padterm/history.json".into()
}
fn default_history_max() -> usize {
    crate::history::MAX_HISTORY_ENTRIES
}

/// Resolve a configured working directory, ignoring paths that do not exist.
pub fn resolve_working_dir(dir: Option<&str>) -> Option<PathBuf> {
    let path = expand_home(dir?);
    if Path::new(&path).is_dir() {
        Some(path)
    } else {
        tracing::warn!(path = %path.display(), "configured working_dir does not exist, ignoring");
        None
    }
}
