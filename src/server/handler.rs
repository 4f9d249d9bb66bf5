//! russh callbacks. Each one translates the transport event into a
//! [`SessionDispatcher`] call and acts on the verdict.

use super::relay;
use crate::dispatcher::SessionDispatcher;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const EXEC_NOTICE: &[u8] = b"Command execution is not supported; open an interactive shell instead.\r\n";

/// Per-connection handler state.
pub struct SshHandler {
    dispatcher: SessionDispatcher,
    peer: SocketAddr,
    /// Session channels opened but not yet bound to a shell.
    pending: HashMap<ChannelId, Channel<Msg>>,
    /// Channels running a shell engine.
    shells: HashSet<ChannelId>,
    /// Remote forward listeners keyed by the (address, port) the client asked for.
    remote_forwards: HashMap<(String, u32), JoinHandle<()>>,
}

impl SshHandler {
    pub fn new(dispatcher: SessionDispatcher, peer: SocketAddr) -> Self {
        Self {
            dispatcher,
            peer,
            pending: HashMap::new(),
            shells: HashSet::new(),
            remote_forwards: HashMap::new(),
        }
    }
}

impl Drop for SshHandler {
    fn drop(&mut self) {
        for (_, task) in self.remote_forwards.drain() {
            task.abort();
        }
        self.dispatcher.on_connection_closed(None);
    }
}

impl Handler for SshHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.dispatcher.on_password_auth(user, password) {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if !self.dispatcher.is_authenticated() {
            return Ok(false);
        }
        tracing::debug!(peer = %self.peer, channel = ?channel.id(), "Session channel opened");
        self.pending.insert(channel.id(), channel);
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(peer = %self.peer, term, cols = col_width, rows = row_height, "PTY request");
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(engine) = self.dispatcher.on_session_requested() else {
            let _ = session.channel_failure(channel);
            return Ok(());
        };
        let Some(chan) = self.pending.remove(&channel) else {
            let _ = session.channel_failure(channel);
            return Ok(());
        };
        let _ = session.channel_success(channel);
        self.shells.insert(channel);

        let handle = session.handle();
        let peer = self.peer;
        tokio::spawn(async move {
            let mut stream = chan.into_stream();
            if let Err(e) = engine.run(&mut stream).await {
                tracing::debug!(peer = %peer, error = %e, "Shell stream ended with error");
            }
            drop(stream);
            let _ = handle.exit_status_request(channel, 0).await;
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
        });
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data);
        self.dispatcher.on_exec_requested(&command);
        self.pending.remove(&channel);
        let _ = session.channel_success(channel);
        let _ = session.data(channel, CryptoVec::from_slice(EXEC_NOTICE));
        let _ = session.exit_status_request(channel, 0);
        let _ = session.eof(channel);
        let _ = session.close(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.dispatcher.on_subsystem_requested(name) {
            let _ = session.channel_failure(channel);
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.pending.remove(&channel);
        if self.shells.remove(&channel) {
            self.dispatcher.on_session_closed();
        }
        Ok(())
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let verdict = self.dispatcher.on_local_forward_requested(
            host_to_connect,
            port_to_connect,
            originator_address,
            originator_port,
        );
        if !verdict.is_approved() {
            return Ok(false);
        }
        let Ok(port) = u16::try_from(port_to_connect) else {
            tracing::warn!(port = port_to_connect, "Forward destination port out of range");
            return Ok(false);
        };
        relay::spawn_direct(channel, host_to_connect.to_string(), port);
        Ok(true)
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if !self
            .dispatcher
            .on_remote_forward_requested(address, *port)
            .is_approved()
        {
            return Ok(false);
        }
        let Ok(bind_port) = u16::try_from(*port) else {
            return Ok(false);
        };

        let listener = match TcpListener::bind((address, bind_port)).await {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(address, port = bind_port, error = %e, "Failed to bind remote forward");
                return Ok(false);
            }
        };
        if *port == 0 {
            if let Ok(local) = listener.local_addr() {
                *port = u32::from(local.port());
            }
        }
        tracing::info!(peer = %self.peer, address, port = *port, "Remote forward listening");

        let task = relay::spawn_remote_listener(listener, session.handle(), address.to_string(), *port);
        if let Some(previous) = self.remote_forwards.insert((address.to_string(), *port), task) {
            previous.abort();
        }
        Ok(true)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        match self.remote_forwards.remove(&(address.to_string(), port)) {
            Some(task) => {
                task.abort();
                self.dispatcher.on_remote_forward_cancelled(address, port);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
