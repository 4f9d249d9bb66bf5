//! secure-tunnel: SSH server with a sandboxed file shell and policy-gated port forwarding.
//!
//! Re-exports configuration, policy, authentication, forwarding, shell, and audit types.

pub mod audit;
pub mod auth;
pub mod config;
pub mod containment;
pub mod dispatcher;
pub mod error;
pub mod forwarding;
pub mod logging;
pub mod policy;
pub mod server;
pub mod shell;

pub use audit::{AuditEvent, AuditEventType, AuditLogger};
pub use auth::{AuthOutcome, Authenticator, Credentials};
pub use config::{
    AuditConfig, Config, DirectoriesConfig, ForwardingConfig, LoggingConfig, ServerConfig,
};
pub use dispatcher::SessionDispatcher;
pub use error::{ConfigError, ShellError};
pub use forwarding::{
    ForwardKind, ForwardRequest, ForwardingEvaluator, ForwardingRules, PortRange, Verdict,
};
pub use policy::ServerPolicy;
pub use shell::{ShellEngine, ShellState};
