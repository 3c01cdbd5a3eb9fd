use std::sync::Arc;

use color_eyre::eyre::Context;
use russh::{
    client::{self, Config},
    keys::{PrivateKey, decode_secret_key, key::PrivateKeyWithHashAlg},
};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    address::RemoteAddress,
    config::{ForwardingOptions, ServerCredentials},
    error::ForwarderError,
    fingerprints::HostKeyVerifier,
    ssh::{SshClient, TunnelClientHandler},
};

const DEFAULT_SSH_PORT: u16 = 22;

// Establish the SSH connection shared by every forwarding session.
//
// Public key authentication is attempted first, then password authentication.
pub(crate) async fn login(
    credentials: &ServerCredentials,
    options: &ForwardingOptions,
) -> color_eyre::Result<SshClient> {
    let password = credentials.password();
    let key_path = credentials.key_path();
    if password.is_none() && key_path.is_none() {
        return Err(ForwarderError::MissingCredentials.into());
    }
    let key = match key_path {
        Some(path) => {
            let key = fs::read_to_string(path)
                .await
                .with_context(|| ForwarderError::UnreadableKeyFile(path.into()))?;
            Some(
                decode_secret_key(&key, credentials.key_passphrase.as_deref())
                    .with_context(|| "Error decoding private key")?,
            )
        }
        None => None,
    };
    let verifier = HostKeyVerifier::from_config(credentials.host_key_fingerprint.as_deref())?;
    let server = RemoteAddress::parse_with_default_port(&credentials.addr, DEFAULT_SSH_PORT)?;

    let config = Arc::new(Config {
        keepalive_interval: options.keepalive_interval,
        ..Default::default()
    });
    let closed = CancellationToken::new();
    let handler = TunnelClientHandler {
        server: server.clone(),
        verifier,
        closed: closed.clone(),
    };
    let mut handle = client::connect(config, (server.host.as_str(), server.port), handler)
        .await
        .with_context(|| format!("Error connecting to SSH server {server}"))?;

    let mut authenticated = false;
    if let Some(key) = key {
        authenticated = authenticate_with_key(&mut handle, &credentials.user, key).await?;
    }
    if !authenticated {
        if let Some(password) = password {
            authenticated = handle
                .authenticate_password(credentials.user.clone(), password)
                .await
                .with_context(|| "Error during password authentication")?
                .success();
            if !authenticated {
                warn!(%server, user = %credentials.user, "Password rejected.");
            }
        }
    }
    let client = SshClient {
        handle,
        server,
        closed,
    };
    if !authenticated {
        client.disconnect().await;
        return Err(ForwarderError::AuthenticationFailed(credentials.user.clone()).into());
    }
    info!(server = %client.server, user = %credentials.user, "Logged into SSH server.");
    Ok(client)
}

async fn authenticate_with_key(
    handle: &mut client::Handle<TunnelClientHandler>,
    user: &str,
    key: PrivateKey,
) -> color_eyre::Result<bool> {
    // Non-RSA keys ignore the hash algorithm.
    let hash_alg = handle
        .best_supported_rsa_hash()
        .await
        .with_context(|| "Error negotiating RSA hash algorithm")?
        .flatten();
    let result = handle
        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
        .await
        .with_context(|| "Error during public key authentication")?;
    if !result.success() {
        warn!(%user, "Public key rejected.");
    }
    Ok(result.success())
}
