//! Configuration types for the server, forwarding rules, sandbox directories, logging, and audit.
//!
//! Loaded once from a TOML file at startup. Every key except the credential pair
//! has a fallback; list-valued keys are comma-separated strings.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    #[serde(default)]
    pub directories: DirectoriesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse a config document and check the keys that have no fallback.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        if config.server.username.is_empty() {
            return Err(ConfigError::Invalid(
                "server.username must not be empty".into(),
            ));
        }
        if config.server.password.is_empty() {
            return Err(ConfigError::Invalid(
                "server.password must not be empty".into(),
            ));
        }
        Ok(config)
    }
}

// ── Server ─────────────────────────────────────────────────────────

/// Listen address, credential pair, and host key location.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// The single accepted username.
    pub username: String,
    /// The single accepted password.
    pub password: String,
    /// OpenSSH private key file; generated (Ed25519) when missing.
    #[serde(default = "default_host_key_path")]
    pub host_key_path: PathBuf,
}

// Keeps the password out of debug output and logs.
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host_key_path", &self.host_key_path)
            .finish()
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    2222
}
fn default_host_key_path() -> PathBuf {
    PathBuf::from("ssh_host_key")
}

// ── Forwarding ─────────────────────────────────────────────────────

/// Port forwarding switches and remote-forward allow rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingConfig {
    #[serde(default = "default_true")]
    pub allow_local_forwarding: bool,
    #[serde(default = "default_true")]
    pub allow_remote_forwarding: bool,
    #[serde(default = "default_true")]
    pub allow_socks: bool,
    /// Comma-separated hosts a remote forward may listen on.
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: String,
    /// Inclusive `"min-max"` port range for remote forwards.
    #[serde(default = "default_allowed_ports")]
    pub allowed_ports: String,
}

fn default_true() -> bool {
    true
}
fn default_allowed_hosts() -> String {
    "localhost,127.0.0.1".into()
}
fn default_allowed_ports() -> String {
    "1024-65535".into()
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            allow_local_forwarding: true,
            allow_remote_forwarding: true,
            allow_socks: true,
            allowed_hosts: default_allowed_hosts(),
            allowed_ports: default_allowed_ports(),
        }
    }
}

// ── Directories ────────────────────────────────────────────────────

/// Sandbox root and approved directories for the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoriesConfig {
    /// Initial and default working directory of every session.
    #[serde(default = "default_base_directory")]
    pub base_directory: PathBuf,
    /// Comma-separated approved roots. Falls back to `base_directory` alone.
    #[serde(default)]
    pub allowed_directories: Option<String>,
}

fn default_base_directory() -> PathBuf {
    PathBuf::from(".")
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            base_directory: default_base_directory(),
            allowed_directories: None,
        }
    }
}

impl DirectoriesConfig {
    /// Approved roots as configured (not yet canonicalized).
    pub fn approved_roots(&self) -> Vec<PathBuf> {
        match self.allowed_directories.as_deref() {
            Some(list) if !split_list(list).is_empty() => {
                split_list(list).into_iter().map(PathBuf::from).collect()
            }
            _ => vec![self.base_directory.clone()],
        }
    }
}

// ── Logging / Audit ────────────────────────────────────────────────

/// Process log settings. `RUST_LOG` overrides `log_level` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Optional log file written in addition to stdout.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

/// Audit logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_audit_log_path")]
    pub log_path: String,
    #[serde(default = "default_audit_max_size_mb")]
    pub max_size_mb: u32,
}

fn default_audit_enabled() -> bool {
    true
}
fn default_audit_log_path() -> String {
    "audit.log".into()
}
fn default_audit_max_size_mb() -> u32 {
    100
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            log_path: default_audit_log_path(),
            max_size_mb: default_audit_max_size_mb(),
        }
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
