use std::{future::Future, net::SocketAddr};

use tokio::io::{AsyncRead, AsyncWrite};

// Trait for opening tunneling channels to remote addresses (via an underlying SSH session).
pub(crate) trait ConnectionHandler {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    // Return a tunneling channel to the remote "host:port", on behalf of the originator.
    fn tunneling_channel(
        &self,
        remote: &str,
        originator: SocketAddr,
    ) -> impl Future<Output = color_eyre::Result<Self::Stream>> + Send;
}
