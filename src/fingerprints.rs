use std::str::FromStr;

use russh::keys::{HashAlg, PublicKey, ssh_key::Fingerprint};
use tracing::{error, info, warn};

use crate::error::ForwarderError;

// Policy for accepting the SSH server's host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostKeyVerifier {
    /// Accept any key the server presents.
    AcceptAny,
    /// Only accept a key with this fingerprint.
    Pinned(Fingerprint),
}

impl HostKeyVerifier {
    pub(crate) fn from_config(fingerprint: Option<&str>) -> Result<Self, ForwarderError> {
        match fingerprint.map(str::trim).filter(|value| !value.is_empty()) {
            None => Ok(HostKeyVerifier::AcceptAny),
            Some(value) => Fingerprint::from_str(value)
                .map(HostKeyVerifier::Pinned)
                .map_err(|_| ForwarderError::InvalidFingerprint(value.into())),
        }
    }

    pub(crate) fn verify(&self, server: &str, key: &PublicKey) -> bool {
        match self {
            HostKeyVerifier::AcceptAny => {
                let fingerprint = key.fingerprint(HashAlg::Sha256);
                warn!(
                    %server, %fingerprint,
                    "Accepting SSH host key without verification."
                );
                true
            }
            HostKeyVerifier::Pinned(expected) => {
                // Compare with the same hash algorithm that the pin uses.
                let fingerprint = key.fingerprint(expected.algorithm());
                if &fingerprint == expected {
                    info!(%server, %fingerprint, "SSH host key matches pinned fingerprint.");
                    true
                } else {
                    error!(
                        %server, %fingerprint, %expected,
                        "SSH host key doesn't match pinned fingerprint."
                    );
                    false
                }
            }
        }
    }
}
