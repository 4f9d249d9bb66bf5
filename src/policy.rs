//! Server policy: credential pair, forwarding rules, sandbox root, and approved directories.
//!
//! Built once at startup and shared read-only (`Arc<ServerPolicy>`) by every connection.

use crate::auth::Credentials;
use crate::config::{split_list, Config};
use crate::containment::{self, PathDecision};
use crate::error::ConfigError;
use crate::forwarding::ForwardingRules;
use std::path::{Path, PathBuf};

/// Immutable access-control policy.
#[derive(Debug, Clone)]
pub struct ServerPolicy {
    /// The single accepted credential pair.
    pub credentials: Credentials,
    /// Forwarding switches and remote-forward allow rules.
    pub forwarding: ForwardingRules,
    /// Initial and default working directory of every session (canonical).
    pub sandbox_root: PathBuf,
    /// Approved roots (canonical). Every shell path must resolve under one of these.
    pub approved_roots: Vec<PathBuf>,
}

impl ServerPolicy {
    /// Build the policy from a loaded config.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let fwd = &config.forwarding;
        let forwarding = ForwardingRules {
            allow_local: fwd.allow_local_forwarding,
            allow_remote: fwd.allow_remote_forwarding,
            allow_socks: fwd.allow_socks,
            allowed_hosts: split_list(&fwd.allowed_hosts).into_iter().collect(),
            allowed_ports: ForwardingRules::parse_ports(&fwd.allowed_ports),
        };
        let credentials = Credentials {
            username: config.server.username.clone(),
            password: config.server.password.clone(),
        };
        Self::new(
            credentials,
            forwarding,
            &config.directories.base_directory,
            &config.directories.approved_roots(),
        )
    }

    /// Canonicalize directories and check that the sandbox root is itself approved.
    pub fn new(
        credentials: Credentials,
        forwarding: ForwardingRules,
        sandbox_root: &Path,
        approved_roots: &[PathBuf],
    ) -> Result<Self, ConfigError> {
        let sandbox_root = sandbox_root.canonicalize().map_err(|e| {
            ConfigError::Invalid(format!(
                "base_directory {} is not accessible: {e}",
                sandbox_root.display()
            ))
        })?;
        if !sandbox_root.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "base_directory {} is not a directory",
                sandbox_root.display()
            )));
        }

        let mut roots = Vec::with_capacity(approved_roots.len());
        for root in approved_roots {
            let canon = match root.canonicalize() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(
                        root = %root.display(),
                        error = %e,
                        "Approved directory does not exist; keeping it as configured"
                    );
                    containment::normalize(&absolute(root)?)
                }
            };
            if !roots.contains(&canon) {
                roots.push(canon);
            }
        }

        if !containment::is_contained(&sandbox_root, &roots) {
            return Err(ConfigError::Invalid(format!(
                "base_directory {} is not under any allowed directory",
                sandbox_root.display()
            )));
        }

        Ok(Self {
            credentials,
            forwarding,
            sandbox_root,
            approved_roots: roots,
        })
    }

    /// Resolve a shell argument against `current_dir` and check containment.
    pub fn check_path(&self, current_dir: &Path, input: &str) -> PathDecision {
        containment::check(&self.sandbox_root, current_dir, input, &self.approved_roots)
    }

    /// Like [`check_path`](Self::check_path) but a final symlink is not followed.
    pub fn check_entry(&self, current_dir: &Path, input: &str) -> PathDecision {
        containment::check_entry(&self.sandbox_root, current_dir, input, &self.approved_roots)
    }

    /// Whether an already resolved path lies under an approved root.
    pub fn is_path_allowed(&self, resolved: &Path) -> bool {
        containment::is_contained(resolved, &self.approved_roots)
    }

    /// Whether `path` is one of the approved roots.
    pub fn is_approved_root(&self, path: &Path) -> bool {
        self.approved_roots.iter().any(|r| r == path)
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| ConfigError::Invalid(format!("cannot determine working directory: {e}")))?;
    Ok(cwd.join(path))
}
