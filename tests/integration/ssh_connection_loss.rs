use std::time::Duration;

use burrow::{ApplicationConfig, entrypoint};
use clap::Parser;
use tokio::time::timeout;

use crate::common::{start_echo_server, start_ssh_server, wait_for_port, write_config};

/// This test ensures that burrow exits with an error once the SSH connection
/// is lost, instead of hanging with listeners that can't forward anything.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn ssh_connection_loss() {
    // 1. Start burrow against a running SSH server
    let echo_address = start_echo_server().await;
    let ssh_server = start_ssh_server(None).await;
    let config_path = write_config(&format!(
        r#"
[SSH]
Addr = "{}"
User = "user"
Password = "password"

[Ports]
"28087" = "{echo_address}"

[Forwarding]
ListenAddress = "127.0.0.1"
ShutdownTimeout = "1s"
"#,
        ssh_server.address
    ));
    let config = ApplicationConfig::parse_from([
        "burrow",
        "--config",
        config_path.to_str().unwrap(),
    ]);
    let mut burrow_handle = tokio::spawn(async move { entrypoint(config).await });
    wait_for_port(28087).await;

    // 2. Kill the SSH server along with its sessions
    drop(ssh_server);

    // 3. burrow should stop with an error
    let result = timeout(Duration::from_secs(10), &mut burrow_handle)
        .await
        .expect("timeout waiting for burrow to stop")
        .expect("burrow panicked");
    assert!(result.is_err(), "should've returned an error");
}
