use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr},
    num::NonZero,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use color_eyre::eyre::Context;
use serde::{Deserialize, Deserializer};
use tokio::fs;

/// Forward local TCP ports to remote addresses through a single SSH connection.
#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct ApplicationConfig {
    /// Path to the TOML file with the SSH server credentials and the port mappings.
    #[arg(short, long, default_value_os = "cfg.toml", value_name = "FILE")]
    pub config: PathBuf,
}

/// Contents of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ForwarderConfig {
    /// Server to connect to, and how to authenticate with it.
    #[serde(rename = "SSH", alias = "ssh", alias = "Ssh")]
    pub(crate) ssh: ServerCredentials,
    /// Local port => remote "host:port", e.g. `"8080" = "10.0.0.5:80"`.
    #[serde(rename = "Ports", alias = "ports")]
    pub(crate) ports: BTreeMap<String, String>,
    /// Tuning for the local listeners and relays.
    #[serde(rename = "Forwarding", alias = "forwarding")]
    pub(crate) forwarding: ForwardingOptions,
}

/// Address and credentials of the upstream SSH server.
#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct ServerCredentials {
    /// Address of the SSH server. The port defaults to 22.
    #[serde(alias = "addr", alias = "Address", alias = "address")]
    pub(crate) addr: String,
    #[serde(alias = "user", alias = "Username", alias = "username")]
    pub(crate) user: String,
    #[serde(alias = "password")]
    pub(crate) password: Option<String>,
    /// Path to an OpenSSH private key.
    #[serde(alias = "key_path", alias = "keypath")]
    pub(crate) key_path: Option<PathBuf>,
    /// Passphrase for an encrypted private key.
    #[serde(alias = "key_passphrase")]
    pub(crate) key_passphrase: Option<String>,
    /// If set, only accept a server whose host key matches this SHA256 fingerprint.
    #[serde(alias = "host_key_fingerprint")]
    pub(crate) host_key_fingerprint: Option<String>,
}

impl ServerCredentials {
    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|password| !password.is_empty())
    }

    pub(crate) fn key_path(&self) -> Option<&Path> {
        self.key_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

// Secrets must not end up in logs.
impl std::fmt::Debug for ServerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCredentials")
            .field("addr", &self.addr)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .field(
                "key_passphrase",
                &self.key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("host_key_fingerprint", &self.host_key_fingerprint)
            .finish()
    }
}

/// Options shared by every forwarding session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct ForwardingOptions {
    /// Address that the local listeners bind to.
    #[serde(alias = "listen_address")]
    pub(crate) listen_address: IpAddr,
    /// How many connections each port mapping relays at once. Unbounded if unset.
    #[serde(alias = "max_connections")]
    pub(crate) max_connections: Option<NonZero<usize>>,
    /// How long until a relayed connection is forcefully closed. No timeout if unset.
    #[serde(alias = "connection_timeout", deserialize_with = "optional_duration")]
    pub(crate) connection_timeout: Option<Duration>,
    /// Buffer size for each direction of a relay.
    #[serde(alias = "buffer_size")]
    pub(crate) buffer_size: usize,
    /// Interval between SSH keepalive messages. Disabled if unset.
    #[serde(alias = "keepalive_interval", deserialize_with = "optional_duration")]
    pub(crate) keepalive_interval: Option<Duration>,
    /// How long to wait for in-flight connections when shutting down.
    #[serde(alias = "shutdown_timeout", deserialize_with = "duration")]
    pub(crate) shutdown_timeout: Duration,
}

impl Default for ForwardingOptions {
    fn default() -> Self {
        ForwardingOptions {
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_connections: None,
            connection_timeout: None,
            buffer_size: 32_768,
            keepalive_interval: None,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

fn optional_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|value| humantime::parse_duration(&value).map_err(serde::de::Error::custom))
        .transpose()
}

// A local port to listen on and the remote address to relay its connections to.
//
// Both sides are kept as written: the local port is checked when binding, and
// the remote address when dialing, so one bad entry can't stop the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PortMapping {
    pub(crate) local_port: String,
    pub(crate) remote: String,
}

impl ForwarderConfig {
    /// Read and decode the configuration file.
    pub(crate) async fn load(path: &Path) -> color_eyre::Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Error reading configuration file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Error parsing configuration file {}", path.display()))
    }

    pub(crate) fn parse(contents: &str) -> color_eyre::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub(crate) fn port_mappings(&self) -> Vec<PortMapping> {
        self.ports
            .iter()
            .map(|(local, remote)| PortMapping {
                local_port: local.trim().into(),
                remote: remote.trim().into(),
            })
            .collect()
    }
}
