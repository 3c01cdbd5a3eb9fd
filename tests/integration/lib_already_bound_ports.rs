use std::time::Duration;

use burrow::{ApplicationConfig, entrypoint};
use clap::Parser;
use tokio::{net::TcpListener, time::timeout};

use crate::common::{start_ssh_server, write_config};

/// This test ensures that burrow fails to initialize if one of its local
/// ports is already bound.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn lib_already_bound_ports() {
    // 1. Bind one of the local ports before burrow does
    let _listener = TcpListener::bind(("127.0.0.1", 28086))
        .await
        .expect("should be able to bind open port");
    let ssh_server = start_ssh_server(None).await;
    let config_path = write_config(&format!(
        r#"
[SSH]
Addr = "{}"
User = "user"
Password = "password"

[Ports]
"28085" = "127.0.0.1:9"
"28086" = "127.0.0.1:9"

[Forwarding]
ListenAddress = "127.0.0.1"
"#,
        ssh_server.address
    ));

    // 2. Fail to initialize burrow
    let config = ApplicationConfig::parse_from([
        "burrow",
        "--config",
        config_path.to_str().unwrap(),
    ]);
    let result = timeout(Duration::from_secs(5), entrypoint(config))
        .await
        .expect("timeout waiting for burrow to fail");
    assert!(result.is_err(), "should've failed to start burrow");

    // 3. The other port was released on the way out
    assert!(TcpListener::bind(("127.0.0.1", 28085)).await.is_ok());
}
