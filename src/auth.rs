//! Password authentication against the single configured credential pair.

use crate::audit::{AuditEvent, AuditEventType, AuditLogger};
use std::fmt;
use std::sync::Arc;

/// Result of one authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    Rejected,
}

impl AuthOutcome {
    pub fn is_accepted(self) -> bool {
        self == AuthOutcome::Accepted
    }
}

/// The one accepted username/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Stateless authenticator. Every call is independent: no lockout, no attempt counting.
pub struct Authenticator {
    credentials: Credentials,
    audit: Arc<AuditLogger>,
}

impl Authenticator {
    pub fn new(credentials: Credentials, audit: Arc<AuditLogger>) -> Self {
        Self { credentials, audit }
    }

    /// Accept iff both fields match byte-for-byte. The attempted username is
    /// audited; the password never is.
    pub fn authenticate(&self, username: &str, password: &str) -> AuthOutcome {
        let user_ok = bytes_equal(username.as_bytes(), self.credentials.username.as_bytes());
        let pass_ok = bytes_equal(password.as_bytes(), self.credentials.password.as_bytes());

        let outcome = if user_ok & pass_ok {
            tracing::info!(user = %username, "Successful authentication");
            AuthOutcome::Accepted
        } else {
            tracing::warn!(user = %username, "Failed authentication attempt");
            AuthOutcome::Rejected
        };

        let event_type = match outcome {
            AuthOutcome::Accepted => AuditEventType::AuthSuccess,
            AuthOutcome::Rejected => AuditEventType::AuthFailure,
        };
        self.audit
            .record(AuditEvent::new(event_type).with_actor(Some(username.to_string()), None));

        outcome
    }
}

/// Compares every byte of the shorter input, whatever the position of the first mismatch.
fn bytes_equal(a: &[u8], b: &[u8]) -> bool {
    let mut diff = (a.len() != b.len()) as u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
