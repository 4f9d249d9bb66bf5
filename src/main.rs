use anyhow::{Context, Result};
use clap::Parser;
use secure_tunnel::{logging, server, AuditLogger, Config, ServerPolicy};
use std::path::PathBuf;
use std::sync::Arc;

/// SSH server with a sandboxed file shell and policy-gated port forwarding.
#[derive(Debug, Parser)]
#[command(name = "secure-tunnel", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    logging::init(&config.logging)?;
    tracing::info!("Starting secure-tunnel v{}", env!("CARGO_PKG_VERSION"));

    let policy = Arc::new(ServerPolicy::from_config(&config)?);
    // Relative audit paths resolve next to the config file.
    let audit_base = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let audit = Arc::new(AuditLogger::new(config.audit.clone(), audit_base));

    let fwd = &policy.forwarding;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        user = %policy.credentials.username,
        "Server configuration loaded"
    );
    tracing::info!(
        local = fwd.allow_local,
        remote = fwd.allow_remote,
        socks = fwd.allow_socks,
        allowed_hosts = ?fwd.allowed_hosts,
        allowed_ports = %fwd.allowed_ports.map(|r| r.to_string()).unwrap_or_else(|| "none".into()),
        "Forwarding policy"
    );
    tracing::info!(
        base = %policy.sandbox_root.display(),
        allowed = ?policy.approved_roots,
        "Sandbox directories"
    );

    server::run_server(&config.server, policy, audit).await
}
