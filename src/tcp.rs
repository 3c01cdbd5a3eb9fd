use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use bon::Builder;
use color_eyre::eyre::Context;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Semaphore,
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
#[cfg(not(coverage_nightly))]
use tracing::{info, warn};

use crate::{
    address::parse_local_port, config::PortMapping, connection_handler::ConnectionHandler,
};

// Service that listens on a local port and relays each connection through a tunneling channel.
#[derive(Builder)]
pub(crate) struct ForwardingSession<H> {
    // Local port and the remote address its connections are relayed to.
    mapping: PortMapping,
    // Shared handler that opens the tunneling channels.
    handler: Arc<H>,
    // Buffer size for each direction of a relay.
    buffer_size: usize,
    // Optional duration to time out relayed connections.
    connection_timeout: Option<Duration>,
    // Optional bound on concurrently relayed connections.
    connection_limit: Option<Arc<Semaphore>>,
    // Tracker for the relay tasks, so they can be drained on shutdown.
    tracker: TaskTracker,
    // Stops accepting new connections.
    stop_accepting: CancellationToken,
    // Forcefully closes the relayed connections.
    close_connections: CancellationToken,
}

impl<H> ForwardingSession<H>
where
    H: ConnectionHandler + Send + Sync + 'static,
{
    // Bind the local listener for this session.
    pub(crate) async fn listen(&self, address: IpAddr) -> color_eyre::Result<TcpListener> {
        let port = parse_local_port(&self.mapping.local_port)?;
        TcpListener::bind((address, port))
            .await
            .with_context(|| format!("Error listening on port {port}"))
    }

    // Accept connections until cancelled, or until the listener fails.
    pub(crate) async fn run(self: Arc<Self>, listener: TcpListener) -> color_eyre::Result<()> {
        let port = &self.mapping.local_port;
        let remote = &self.mapping.remote;
        #[cfg(not(coverage_nightly))]
        info!(%port, %remote, "Forwarding session started.");
        loop {
            let (stream, address) = tokio::select! {
                conn = listener.accept() => conn
                    .with_context(|| format!("Error accepting connection on port {port}"))?,
                _ = self.stop_accepting.cancelled() => {
                    #[cfg(not(coverage_nightly))]
                    info!(%port, %remote, "Forwarding session stopped.");
                    return Ok(());
                }
            };
            if let Err(error) = stream.set_nodelay(true) {
                #[cfg(not(coverage_nightly))]
                warn!(%address, %error, "Error setting nodelay.");
            }
            let session = Arc::clone(&self);
            self.tracker.spawn(async move {
                session.handle_connection(stream, address).await;
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, address: SocketAddr) {
        let port = &self.mapping.local_port;
        let remote = &self.mapping.remote;
        #[cfg(not(coverage_nightly))]
        info!(peer = %address, %port, "Accepted connection.");
        // Wait for a free slot if the number of connections is bounded.
        let _permit = match self.connection_limit.as_ref() {
            Some(semaphore) => tokio::select! {
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                _ = self.stop_accepting.cancelled() => return,
            },
            None => None,
        };
        let channel = match self.handler.tunneling_channel(remote, address).await {
            Ok(channel) => channel,
            Err(error) => {
                #[cfg(not(coverage_nightly))]
                warn!(peer = %address, %remote, %error, "Dial to remote address failed.");
                return;
            }
        };
        #[cfg(not(coverage_nightly))]
        info!(peer = %address, %remote, "Connected.");
        let (inbound_read, inbound_write) = stream.into_split();
        let (channel_read, channel_write) = tokio::io::split(channel);
        let mut sent = 0u64;
        let mut received = 0u64;
        // The pair is done as soon as either direction is; both ends get dropped together.
        let result = {
            let upload = pump(inbound_read, channel_write, self.buffer_size, &mut sent);
            let download = pump(channel_read, inbound_write, self.buffer_size, &mut received);
            let relay = async {
                tokio::select! {
                    result = upload => result,
                    result = download => result,
                }
            };
            let relay = async {
                match self.connection_timeout {
                    Some(duration) => timeout(duration, relay)
                        .await
                        .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into())),
                    None => relay.await,
                }
            };
            tokio::select! {
                result = relay => result,
                _ = self.close_connections.cancelled() => Err(std::io::ErrorKind::Interrupted.into()),
            }
        };
        match result {
            Ok(()) => {
                #[cfg(not(coverage_nightly))]
                info!(peer = %address, %remote, %sent, %received, "Connection closed.");
            }
            Err(error) => {
                #[cfg(not(coverage_nightly))]
                info!(peer = %address, %remote, %sent, %received, %error, "Connection closed.");
            }
        }
    }
}

// Copy one direction of a relay until EOF, then shut down the writer.
async fn pump<R, W>(
    reader: R,
    mut writer: W,
    buffer_size: usize,
    transferred: &mut u64,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::with_capacity(buffer_size, reader);
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            break;
        }
        writer.write_all(buf).await?;
        let len = buf.len();
        reader.consume(len);
        *transferred += len as u64;
    }
    writer.shutdown().await
}
