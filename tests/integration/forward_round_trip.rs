use std::time::Duration;

use burrow::{ApplicationConfig, entrypoint};
use clap::Parser;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};

use crate::common::{
    ForwarderHandle, start_ssh_server, wait_for_dials, wait_for_port, write_config,
};

/// This test ensures that bytes sent to a local port reach the mapped remote
/// address through the SSH server verbatim, in both directions, with a single
/// channel per inbound connection.
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn forward_round_trip() {
    // 1. Start a remote HTTP-like service and the SSH server in front of it
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_address = remote.local_addr().unwrap();
    let ssh_server = start_ssh_server(None).await;

    // 2. Start burrow
    let config_path = write_config(&format!(
        r#"
[SSH]
Addr = "{}"
User = "user"
Password = "password"

[Ports]
"28080" = "{remote_address}"

[Forwarding]
ListenAddress = "127.0.0.1"
"#,
        ssh_server.address
    ));
    let config = ApplicationConfig::parse_from([
        "burrow",
        "--config",
        config_path.to_str().unwrap(),
    ]);
    let _burrow_handle = ForwarderHandle(tokio::spawn(async move { entrypoint(config).await }));
    wait_for_port(28080).await;
    // The readiness probe opened a channel of its own.
    wait_for_dials(&ssh_server, 1).await;
    let baseline = ssh_server.dial_count();
    // Drain the probe's connection on the remote side.
    let (probe, _) = remote.accept().await.unwrap();
    drop(probe);

    // 3. Send a request through the forwarded port and answer it remotely
    let request = b"GET / HTTP/1.1\r\nHost: example\r\n\r\n";
    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
    let mut client = TcpStream::connect("127.0.0.1:28080").await.unwrap();
    client.write_all(request).await.unwrap();
    let (mut upstream, _) = timeout(Duration::from_secs(5), remote.accept())
        .await
        .expect("timeout waiting for forwarded connection")
        .unwrap();
    let mut received = vec![0u8; request.len()];
    upstream.read_exact(&mut received).await.unwrap();
    assert_eq!(received, request);
    upstream.write_all(response).await.unwrap();
    drop(upstream);

    // 4. Read the full response until the remote side closes
    let mut body = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut body))
        .await
        .expect("timeout waiting for response")
        .unwrap();
    assert_eq!(body, response);
    assert_eq!(ssh_server.dial_count(), baseline + 1);
    assert_eq!(
        ssh_server.dials.lock().unwrap().last().unwrap(),
        &remote_address.to_string()
    );
}
