//! Audit logging for authentication, forwarding, and sandbox events.
//!
//! Events are appended to a JSON-lines file, one object per line. Appends are
//! serialized so concurrent sessions can share one logger.

use crate::config::AuditConfig;
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use uuid::Uuid;

/// Rotated files kept next to the live log.
const KEPT_ROTATIONS: u32 = 9;

/// Audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Password accepted.
    AuthSuccess,
    /// Password rejected.
    AuthFailure,
    /// Forward request approved by policy.
    ForwardApproved,
    /// Forward request denied by policy.
    ForwardDenied,
    /// Shell command tried to reach a path outside the approved roots.
    PathViolation,
    /// Interactive shell started.
    SessionOpened,
    /// Interactive shell ended.
    SessionClosed,
    /// Exec request received (logged, never run).
    ExecRequest,
    /// Subsystem request rejected.
    SubsystemRejected,
}

/// Who triggered the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub username: Option<String>,
    pub peer: Option<String>,
}

/// Full forward request tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardDetails {
    /// local, remote, or socks.
    pub kind: String,
    pub host: Option<String>,
    pub port: Option<u32>,
    pub origin_host: Option<String>,
    pub origin_port: Option<u32>,
}

/// Sandbox path details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathDetails {
    pub command: String,
    pub path: String,
}

/// Complete audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
    pub event_type: AuditEventType,
    pub actor: Option<Actor>,
    pub forward: Option<ForwardDetails>,
    pub path: Option<PathDetails>,
    /// Free-form detail (exec command line, subsystem name, ...).
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_id: Uuid::new_v4().to_string(),
            event_type,
            actor: None,
            forward: None,
            path: None,
            detail: None,
        }
    }

    /// Set the actor.
    pub fn with_actor(mut self, username: Option<String>, peer: Option<String>) -> Self {
        self.actor = Some(Actor { username, peer });
        self
    }

    /// Attach a forward request tuple.
    pub fn with_forward(mut self, forward: ForwardDetails) -> Self {
        self.forward = Some(forward);
        self
    }

    /// Attach the command and resolved path of a sandbox event.
    pub fn with_path(mut self, command: &str, path: &str) -> Self {
        self.path = Some(PathDetails {
            command: command.to_string(),
            path: path.to_string(),
        });
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Audit logger writing events to a log file.
pub struct AuditLogger {
    log_path: PathBuf,
    config: AuditConfig,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    /// Create a new audit logger. `base_dir` is the directory in which `config.log_path` is resolved.
    pub fn new(config: AuditConfig, base_dir: PathBuf) -> Self {
        let log_path = base_dir.join(&config.log_path);
        Self {
            log_path,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// A logger that drops every event.
    pub fn disabled() -> Self {
        Self::new(
            AuditConfig {
                enabled: false,
                ..AuditConfig::default()
            },
            PathBuf::new(),
        )
    }

    /// Log an event.
    pub fn log(&self, event: &AuditEvent) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let line = serde_json::to_string(event)?;
        let _guard = self.write_lock.lock();

        self.rotate_if_needed()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        writeln!(file, "{}", line)?;
        file.sync_all()?;

        Ok(())
    }

    /// Log an event; a failing sink is reported through tracing and otherwise ignored.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(&event) {
            tracing::warn!(
                error = %e,
                event_type = ?event.event_type,
                "Failed to write audit event"
            );
        }
    }

    /// Shift `audit.log` to `audit.log.1` (and older files up by one) once it
    /// reaches `max_size_mb`. Only the newest [`KEPT_ROTATIONS`] files are kept.
    fn rotate_if_needed(&self) -> Result<()> {
        let limit = u64::from(self.config.max_size_mb) * 1024 * 1024;
        match std::fs::metadata(&self.log_path) {
            Ok(meta) if meta.len() >= limit => {}
            _ => return Ok(()),
        }

        let _ = std::fs::remove_file(self.rotated_path(KEPT_ROTATIONS));
        for n in (1..KEPT_ROTATIONS).rev() {
            let from = self.rotated_path(n);
            if from.exists() {
                std::fs::rename(&from, self.rotated_path(n + 1))?;
            }
        }
        std::fs::rename(&self.log_path, self.rotated_path(1))?;
        Ok(())
    }

    fn rotated_path(&self, n: u32) -> PathBuf {
        let mut name = self.log_path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }
}
