//! Forwarding policy: local (direct-tcpip), remote (tcpip-forward), and SOCKS-style dynamic forwarding.
//!
//! Every evaluation is independent and every verdict is logged with the full request tuple.

use crate::audit::{AuditEvent, AuditEventType, AuditLogger, ForwardDetails};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Flavor of a forward request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardKind {
    Local,
    Remote,
    Socks,
}

impl ForwardKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ForwardKind::Local => "local",
            ForwardKind::Remote => "remote",
            ForwardKind::Socks => "socks",
        }
    }
}

impl fmt::Display for ForwardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One client ask to open a tunnel. Evaluated once, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub kind: ForwardKind,
    /// Destination (local) or listen address (remote). Empty for SOCKS.
    pub host: String,
    pub port: u32,
    /// Originator address; local forwards only.
    pub origin: Option<(String, u32)>,
}

impl ForwardRequest {
    pub fn local(dest_host: &str, dest_port: u32, origin_host: &str, origin_port: u32) -> Self {
        Self {
            kind: ForwardKind::Local,
            host: dest_host.to_string(),
            port: dest_port,
            origin: Some((origin_host.to_string(), origin_port)),
        }
    }

    pub fn remote(listen_host: &str, listen_port: u32) -> Self {
        Self {
            kind: ForwardKind::Remote,
            host: listen_host.to_string(),
            port: listen_port,
            origin: None,
        }
    }

    pub fn socks() -> Self {
        Self {
            kind: ForwardKind::Socks,
            host: String::new(),
            port: 0,
            origin: None,
        }
    }

    fn audit_details(&self) -> ForwardDetails {
        let has_target = self.kind != ForwardKind::Socks;
        ForwardDetails {
            kind: self.kind.as_str().to_string(),
            host: has_target.then(|| self.host.clone()),
            port: has_target.then_some(self.port),
            origin_host: self.origin.as_ref().map(|(h, _)| h.clone()),
            origin_port: self.origin.as_ref().map(|(_, p)| *p),
        }
    }
}

/// Policy verdict on a forward request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Denied,
}

impl Verdict {
    pub fn is_approved(self) -> bool {
        self == Verdict::Approved
    }

    fn from_bool(approved: bool) -> Self {
        if approved {
            Verdict::Approved
        } else {
            Verdict::Denied
        }
    }
}

/// Inclusive port range parsed from `"min-max"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub fn contains(&self, port: u32) -> bool {
        u16::try_from(port).is_ok_and(|p| self.min <= p && p <= self.max)
    }
}

impl FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lo, hi) = s
            .split_once('-')
            .ok_or_else(|| format!("port range '{s}' is not of the form min-max"))?;
        let min: u16 = lo
            .trim()
            .parse()
            .map_err(|_| format!("port range '{s}': invalid minimum"))?;
        let max: u16 = hi
            .trim()
            .parse()
            .map_err(|_| format!("port range '{s}': invalid maximum"))?;
        if min > max {
            return Err(format!("port range '{s}': minimum exceeds maximum"));
        }
        Ok(Self { min, max })
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Forwarding switches and remote-forward allow rules. Pure decisions, no logging.
#[derive(Debug, Clone)]
pub struct ForwardingRules {
    pub allow_local: bool,
    pub allow_remote: bool,
    pub allow_socks: bool,
    pub allowed_hosts: HashSet<String>,
    /// `None` when the configured range was malformed: every remote forward is denied.
    pub allowed_ports: Option<PortRange>,
}

impl Default for ForwardingRules {
    fn default() -> Self {
        Self {
            allow_local: true,
            allow_remote: true,
            allow_socks: true,
            allowed_hosts: ["localhost", "127.0.0.1"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_ports: Some(PortRange {
                min: 1024,
                max: 65535,
            }),
        }
    }
}

impl ForwardingRules {
    /// Parse the configured port range, failing closed on malformed input.
    pub fn parse_ports(raw: &str) -> Option<PortRange> {
        match raw.parse() {
            Ok(range) => Some(range),
            Err(reason) => {
                tracing::warn!(
                    allowed_ports = %raw,
                    %reason,
                    "Malformed allowed_ports; every remote forward will be denied"
                );
                None
            }
        }
    }

    /// Local forwards are gated only by the switch.
    pub fn local(&self, _dest_host: &str, _dest_port: u32) -> Verdict {
        Verdict::from_bool(self.allow_local)
    }

    pub fn remote(&self, listen_host: &str, listen_port: u32) -> Verdict {
        Verdict::from_bool(
            self.allow_remote
                && self.allowed_hosts.contains(listen_host)
                && self
                    .allowed_ports
                    .is_some_and(|range| range.contains(listen_port)),
        )
    }

    pub fn socks(&self) -> Verdict {
        Verdict::from_bool(self.allow_socks)
    }
}

/// Evaluates forward requests against the rules and records every verdict.
pub struct ForwardingEvaluator {
    rules: ForwardingRules,
    audit: Arc<AuditLogger>,
}

impl ForwardingEvaluator {
    pub fn new(rules: ForwardingRules, audit: Arc<AuditLogger>) -> Self {
        Self { rules, audit }
    }

    pub fn rules(&self) -> &ForwardingRules {
        &self.rules
    }

    pub fn evaluate_local_forward(
        &self,
        dest_host: &str,
        dest_port: u32,
        origin_host: &str,
        origin_port: u32,
    ) -> Verdict {
        self.evaluate(&ForwardRequest::local(
            dest_host,
            dest_port,
            origin_host,
            origin_port,
        ))
    }

    pub fn evaluate_remote_forward(&self, listen_host: &str, listen_port: u32) -> Verdict {
        self.evaluate(&ForwardRequest::remote(listen_host, listen_port))
    }

    pub fn evaluate_socks(&self) -> Verdict {
        self.evaluate(&ForwardRequest::socks())
    }

    /// Route a request to the rule for its kind, then log and audit the verdict.
    pub fn evaluate(&self, request: &ForwardRequest) -> Verdict {
        let verdict = match request.kind {
            ForwardKind::Local => self.rules.local(&request.host, request.port),
            ForwardKind::Remote => self.rules.remote(&request.host, request.port),
            ForwardKind::Socks => self.rules.socks(),
        };

        let origin = request
            .origin
            .as_ref()
            .map(|(h, p)| format!("{h}:{p}"))
            .unwrap_or_default();
        match verdict {
            Verdict::Approved => tracing::info!(
                kind = %request.kind,
                host = %request.host,
                port = request.port,
                origin = %origin,
                "Port forwarding approved"
            ),
            Verdict::Denied => tracing::warn!(
                kind = %request.kind,
                host = %request.host,
                port = request.port,
                origin = %origin,
                "Port forwarding denied"
            ),
        }

        let event_type = if verdict.is_approved() {
            AuditEventType::ForwardApproved
        } else {
            AuditEventType::ForwardDenied
        };
        self.audit
            .record(AuditEvent::new(event_type).with_forward(request.audit_details()));

        verdict
    }
}
