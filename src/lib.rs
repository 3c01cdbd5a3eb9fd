//! Forward local TCP ports to remote addresses through a single SSH connection.
//!
//! A TOML file names the SSH server, its credentials, and a table of local
//! ports to remote `host:port` destinations. burrow logs into the server once,
//! listens on every local port, and relays each accepted connection through
//! its own `direct-tcpip` channel on the shared connection.

mod address;
mod config;
mod connection_handler;
mod entrypoint;
mod error;
mod fingerprints;
mod login;
mod ssh;
mod tcp;

pub use config::ApplicationConfig;
pub use entrypoint::entrypoint;
