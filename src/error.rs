use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub(crate) enum ForwarderError {
    #[error("No private key or password supplied")]
    MissingCredentials,
    #[error("SSH authentication failed for user {0:?}")]
    AuthenticationFailed(String),
    #[error("Invalid local port {0:?}")]
    InvalidLocalPort(String),
    #[error("Invalid address {0:?}")]
    InvalidAddress(String),
    #[error("Invalid host key fingerprint {0:?}")]
    InvalidFingerprint(String),
    #[error("Unable to read private key at {0:?}")]
    UnreadableKeyFile(PathBuf),
    #[error("SSH connection to {0} was closed")]
    ConnectionClosed(String),
    #[error("Every forwarding session has stopped")]
    AllSessionsStopped,
}
