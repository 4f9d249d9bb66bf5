//! Byte relays for approved tunnels.

use russh::server::{Handle, Msg};
use russh::Channel;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Connect to the destination and pump bytes until either side closes.
pub fn spawn_direct(channel: Channel<Msg>, host: String, port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut socket = match TcpStream::connect((host.as_str(), port)).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(host = %host, port, error = %e, "Forward destination unreachable");
                // Dropping the channel closes it on the client side.
                return;
            }
        };
        let mut stream = channel.into_stream();
        match copy_bidirectional(&mut stream, &mut socket).await {
            Ok((up, down)) => tracing::debug!(
                host = %host,
                port,
                bytes_to_target = up,
                bytes_to_client = down,
                "Local forward finished"
            ),
            Err(e) => tracing::debug!(host = %host, port, error = %e, "Local forward ended with error"),
        }
    })
}

/// Accept loop for a remote forward. Each inbound connection is carried back to
/// the client on a fresh forwarded-tcpip channel. Abort the handle to stop listening.
pub fn spawn_remote_listener(
    listener: TcpListener,
    handle: Handle,
    address: String,
    port: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (mut socket, origin) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(address = %address, port, error = %e, "Remote forward accept failed");
                    break;
                }
            };
            let handle = handle.clone();
            let address = address.clone();
            tokio::spawn(async move {
                let channel = match handle
                    .channel_open_forwarded_tcpip(
                        address.clone(),
                        port,
                        origin.ip().to_string(),
                        u32::from(origin.port()),
                    )
                    .await
                {
                    Ok(channel) => channel,
                    Err(e) => {
                        tracing::warn!(address = %address, port, error = ?e, "Client refused forwarded channel");
                        return;
                    }
                };
                let mut stream = channel.into_stream();
                if let Err(e) = copy_bidirectional(&mut stream, &mut socket).await {
                    tracing::debug!(address = %address, port, origin = %origin, error = %e, "Remote forward relay ended with error");
                }
            });
        }
    })
}
