use std::{fmt::Display, net::Ipv6Addr, str::FromStr};

use crate::error::ForwarderError;

// Destination of a forwarded connection, as seen from the SSH server's network.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct RemoteAddress {
    pub(crate) host: String,
    pub(crate) port: u16,
}

impl RemoteAddress {
    // Parse an address that may omit its port, such as the SSH server's.
    pub(crate) fn parse_with_default_port(
        address: &str,
        default_port: u16,
    ) -> Result<Self, ForwarderError> {
        let address = address.trim();
        let missing_port = match address.strip_prefix('[') {
            Some(rest) => rest.ends_with(']'),
            None => !address.contains(':'),
        };
        if missing_port {
            let host = address.trim_start_matches('[').trim_end_matches(']');
            if host.is_empty() {
                return Err(ForwarderError::InvalidAddress(address.into()));
            }
            Ok(RemoteAddress {
                host: host.into(),
                port: default_port,
            })
        } else {
            address.parse()
        }
    }
}

impl FromStr for RemoteAddress {
    type Err = ForwarderError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let invalid = || ForwarderError::InvalidAddress(address.into());
        let trimmed = address.trim();
        let (host, port) = match trimmed.strip_prefix('[') {
            // Bracketed IPv6 literal
            Some(rest) => {
                let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
                host.parse::<Ipv6Addr>().map_err(|_| invalid())?;
                (host, port)
            }
            None => {
                let (host, port) = trimmed.rsplit_once(':').ok_or_else(invalid)?;
                // IPv6 literals must be bracketed to tell them apart from the port
                if host.contains(':') {
                    return Err(invalid());
                }
                (host, port)
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }
        match port.parse::<u16>() {
            Ok(0) | Err(_) => Err(invalid()),
            Ok(port) => Ok(RemoteAddress {
                host: host.into(),
                port,
            }),
        }
    }
}

impl Display for RemoteAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// Parse a key of the port mapping table into a port to listen on.
pub(crate) fn parse_local_port(port: &str) -> Result<u16, ForwarderError> {
    match port.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ForwarderError::InvalidLocalPort(port.into())),
        Ok(port) => Ok(port),
    }
}
