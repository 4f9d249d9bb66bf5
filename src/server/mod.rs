//! SSH transport: listener loop, russh handler, tunnel relays, host key.

mod handler;
pub mod host_key;
mod relay;

pub use handler::SshHandler;

use crate::audit::AuditLogger;
use crate::config::ServerConfig;
use crate::dispatcher::SessionDispatcher;
use crate::policy::ServerPolicy;
use anyhow::{Context, Result};
use russh::{MethodKind, MethodSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Password-only russh configuration around `key`.
pub fn transport_config(key: russh::keys::PrivateKey) -> Arc<russh::server::Config> {
    Arc::new(russh::server::Config {
        methods: MethodSet::from([MethodKind::Password].as_slice()),
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        keys: vec![key],
        ..Default::default()
    })
}

/// Load the host key, bind, and serve until the process stops.
pub async fn run_server(
    config: &ServerConfig,
    policy: Arc<ServerPolicy>,
    audit: Arc<AuditLogger>,
) -> Result<()> {
    let key = host_key::load_or_generate(&config.host_key_path).await?;
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    tracing::info!(address = %listener.local_addr()?, "SSH server listening");
    serve(listener, transport_config(key), policy, audit).await
}

/// Accept loop. One task per connection; a failing connection never stops the loop.
pub async fn serve(
    listener: TcpListener,
    transport: Arc<russh::server::Config>,
    policy: Arc<ServerPolicy>,
    audit: Arc<AuditLogger>,
) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                continue;
            }
        };
        let dispatcher = SessionDispatcher::new(policy.clone(), audit.clone(), peer.to_string());
        dispatcher.on_connection_opened();
        let handler = SshHandler::new(dispatcher, peer);
        let transport = transport.clone();

        tokio::spawn(async move {
            match russh::server::run_stream(transport, stream, handler).await {
                Ok(session) => {
                    if let Err(e) = session.await {
                        tracing::warn!(peer = %peer, error = %e, "SSH session error");
                    }
                }
                Err(e) => tracing::warn!(peer = %peer, error = %e, "SSH handshake failed"),
            }
        });
    }
}
