//! Per-connection request routing.
//!
//! One [`SessionDispatcher`] exists per accepted connection. It owns the
//! connection's authentication state and decides every request the client makes;
//! it never touches transport types, so the SSH adapter stays a thin translation layer.

use crate::audit::{AuditEvent, AuditEventType, AuditLogger};
use crate::auth::Authenticator;
use crate::forwarding::{ForwardingEvaluator, Verdict};
use crate::policy::ServerPolicy;
use crate::shell::ShellEngine;
use std::sync::Arc;

pub struct SessionDispatcher {
    policy: Arc<ServerPolicy>,
    authenticator: Authenticator,
    forwarding: ForwardingEvaluator,
    audit: Arc<AuditLogger>,
    peer: String,
    user: Option<String>,
}

impl SessionDispatcher {
    pub fn new(policy: Arc<ServerPolicy>, audit: Arc<AuditLogger>, peer: impl Into<String>) -> Self {
        let authenticator = Authenticator::new(policy.credentials.clone(), audit.clone());
        let forwarding = ForwardingEvaluator::new(policy.forwarding.clone(), audit.clone());
        Self {
            policy,
            authenticator,
            forwarding,
            audit,
            peer: peer.into(),
            user: None,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// The authenticated username, if any.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn on_connection_opened(&self) {
        tracing::info!(peer = %self.peer, "SSH connection received");
    }

    pub fn on_connection_closed(&self, reason: Option<&str>) {
        match reason {
            Some(reason) => tracing::warn!(peer = %self.peer, %reason, "SSH connection closed with error"),
            None => tracing::info!(peer = %self.peer, "SSH connection closed"),
        }
    }

    /// Returns true when the password is accepted; the connection is then authenticated.
    pub fn on_password_auth(&mut self, username: &str, password: &str) -> bool {
        if self.authenticator.authenticate(username, password).is_accepted() {
            self.user = Some(username.to_string());
            true
        } else {
            false
        }
    }

    /// A fresh shell engine for a new interactive session, or `None` before authentication.
    pub fn on_session_requested(&self) -> Option<ShellEngine> {
        let Some(user) = self.user.as_deref() else {
            tracing::warn!(peer = %self.peer, "Session requested before authentication");
            return None;
        };
        tracing::info!(user = %user, peer = %self.peer, "Interactive session opened");
        self.audit.record(
            AuditEvent::new(AuditEventType::SessionOpened)
                .with_actor(Some(user.to_string()), Some(self.peer.clone())),
        );
        Some(ShellEngine::new(
            self.policy.clone(),
            self.audit.clone(),
            user,
            self.peer.clone(),
        ))
    }

    pub fn on_session_closed(&self) {
        tracing::info!(user = ?self.user, peer = %self.peer, "Interactive session closed");
        self.audit.record(
            AuditEvent::new(AuditEventType::SessionClosed)
                .with_actor(self.user.clone(), Some(self.peer.clone())),
        );
    }

    /// Logged and acknowledged; nothing is ever executed.
    pub fn on_exec_requested(&self, command: &str) {
        tracing::info!(user = ?self.user, peer = %self.peer, command = %command, "Exec request received (not executed)");
        self.audit.record(
            AuditEvent::new(AuditEventType::ExecRequest)
                .with_actor(self.user.clone(), Some(self.peer.clone()))
                .with_detail(command),
        );
    }

    /// Always false.
    pub fn on_subsystem_requested(&self, name: &str) -> bool {
        tracing::warn!(user = ?self.user, peer = %self.peer, subsystem = %name, "Subsystem request rejected");
        self.audit.record(
            AuditEvent::new(AuditEventType::SubsystemRejected)
                .with_actor(self.user.clone(), Some(self.peer.clone()))
                .with_detail(name),
        );
        false
    }

    /// Local (direct-tcpip) forwarding. Dynamic SOCKS forwarding arrives the same way.
    pub fn on_local_forward_requested(
        &self,
        dest_host: &str,
        dest_port: u32,
        origin_host: &str,
        origin_port: u32,
    ) -> Verdict {
        if !self.is_authenticated() {
            return Verdict::Denied;
        }
        self.forwarding
            .evaluate_local_forward(dest_host, dest_port, origin_host, origin_port)
    }

    pub fn on_remote_forward_requested(&self, listen_host: &str, listen_port: u32) -> Verdict {
        if !self.is_authenticated() {
            return Verdict::Denied;
        }
        self.forwarding
            .evaluate_remote_forward(listen_host, listen_port)
    }

    pub fn on_remote_forward_cancelled(&self, listen_host: &str, listen_port: u32) {
        tracing::info!(peer = %self.peer, host = %listen_host, port = listen_port, "Remote forward cancelled");
    }
}
