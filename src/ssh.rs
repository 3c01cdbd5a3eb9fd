use std::net::SocketAddr;

use russh::{
    ChannelStream, Disconnect,
    client::{Handle, Handler, Msg},
    keys::PublicKey,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    address::RemoteAddress, connection_handler::ConnectionHandler,
    fingerprints::HostKeyVerifier,
};

// Client-side callbacks for the SSH connection.
pub(crate) struct TunnelClientHandler {
    // Address of the SSH server, for logging.
    pub(crate) server: RemoteAddress,
    // Policy for the server's host key.
    pub(crate) verifier: HostKeyVerifier,
    // Cancelled once the connection is gone and this handler gets dropped.
    pub(crate) closed: CancellationToken,
}

impl Handler for TunnelClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(self.verifier.verify(&self.server.to_string(), key))
    }
}

impl Drop for TunnelClientHandler {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

// The single authenticated SSH connection, shared by every forwarding session.
pub(crate) struct SshClient {
    pub(crate) handle: Handle<TunnelClientHandler>,
    pub(crate) server: RemoteAddress,
    pub(crate) closed: CancellationToken,
}

impl SshClient {
    // Resolves once the SSH connection has been closed, by either side.
    pub(crate) async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub(crate) async fn disconnect(&self) {
        debug!(server = %self.server, "Disconnecting from SSH server.");
        if let Err(error) = self
            .handle
            .disconnect(Disconnect::ByApplication, "".into(), "English".into())
            .await
        {
            debug!(server = %self.server, %error, "Error disconnecting from SSH server.");
        }
    }
}

impl ConnectionHandler for SshClient {
    type Stream = ChannelStream<Msg>;

    async fn tunneling_channel(
        &self,
        remote: &str,
        originator: SocketAddr,
    ) -> color_eyre::Result<Self::Stream> {
        let remote: RemoteAddress = remote.parse()?;
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                remote.host,
                remote.port.into(),
                originator.ip().to_canonical().to_string(),
                originator.port().into(),
            )
            .await?;
        Ok(channel.into_stream())
    }
}
