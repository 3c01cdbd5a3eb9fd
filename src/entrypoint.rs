use std::{future::Future, sync::Arc, time::Duration};

use color_eyre::eyre::Context;
use tokio::{pin, sync::Semaphore, task::JoinSet, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    config::{ApplicationConfig, ForwarderConfig, PortMapping},
    error::ForwarderError,
    login::login,
    tcp::ForwardingSession,
};

type SessionTasks = JoinSet<(PortMapping, color_eyre::Result<()>)>;

// Main entrypoint of the application.
pub async fn entrypoint(config: ApplicationConfig) -> color_eyre::Result<()> {
    info!("Starting burrow...");
    let forwarder_config = ForwarderConfig::load(&config.config).await?;
    let mappings = forwarder_config.port_mappings();
    let ForwarderConfig {
        ssh,
        forwarding: options,
        ..
    } = forwarder_config;
    if mappings.is_empty() {
        warn!("No ports to forward.");
    }

    let client = Arc::new(
        login(&ssh, &options)
            .await
            .with_context(|| "Error logging into SSH server")?,
    );

    let tracker = TaskTracker::new();
    let stop_accepting = CancellationToken::new();
    let close_connections = CancellationToken::new();
    // Bind every listener before serving any of them, so that a taken port fails early.
    let mut sessions = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        let session = Arc::new(
            ForwardingSession::builder()
                .mapping(mapping.clone())
                .handler(Arc::clone(&client))
                .buffer_size(options.buffer_size)
                .maybe_connection_timeout(options.connection_timeout)
                .maybe_connection_limit(
                    options
                        .max_connections
                        .map(|max| Arc::new(Semaphore::new(max.get()))),
                )
                .tracker(tracker.clone())
                .stop_accepting(stop_accepting.clone())
                .close_connections(close_connections.clone())
                .build(),
        );
        match session.listen(options.listen_address).await {
            Ok(listener) => {
                info!(
                    port = %mapping.local_port, remote = %mapping.remote,
                    "Listening on {}:{}.", options.listen_address, mapping.local_port
                );
                sessions.push((mapping, session, listener));
            }
            Err(error) => {
                client.disconnect().await;
                return Err(error);
            }
        }
    }
    let mut session_tasks = JoinSet::new();
    for (mapping, session, listener) in sessions {
        session_tasks.spawn(async move { (mapping, session.run(listener).await) });
    }
    info!("burrow is now running.");

    // Add OS signal handlers for termination.
    let result = supervise(
        &mut session_tasks,
        client.closed(),
        &client.server.to_string(),
        wait_for_signal(),
    )
    .await;

    info!("burrow is shutting down.");
    stop_accepting.cancel();
    while session_tasks.join_next().await.is_some() {}
    drain_connections(&tracker, &close_connections, options.shutdown_timeout).await;
    client.disconnect().await;
    result
}

// Wait for a termination signal, the loss of the SSH connection, or every session stopping.
//
// A session that fails is only logged; the others keep running.
async fn supervise(
    session_tasks: &mut SessionTasks,
    closed: impl Future<Output = ()>,
    server: &str,
    signal: impl Future<Output = std::io::Result<()>>,
) -> color_eyre::Result<()> {
    pin!(closed);
    pin!(signal);
    let has_sessions = !session_tasks.is_empty();
    loop {
        tokio::select! {
            signal = &mut signal => {
                break signal.with_context(|| "Error listening for termination signals");
            }
            _ = &mut closed => {
                error!(%server, "SSH connection closed.");
                break Err(ForwarderError::ConnectionClosed(server.into()).into());
            }
            joined = session_tasks.join_next(), if has_sessions => match joined {
                Some(Ok((mapping, Err(error)))) => {
                    error!(
                        port = %mapping.local_port, remote = %mapping.remote, ?error,
                        "Forwarding session failed."
                    );
                }
                Some(Ok((mapping, Ok(())))) => {
                    debug!(port = %mapping.local_port, "Forwarding session returned.");
                }
                Some(Err(error)) => {
                    error!(%error, "Forwarding session panicked.");
                }
                None => break Err(ForwarderError::AllSessionsStopped.into()),
            }
        }
    }
}

// Wait for in-flight relays to finish, closing them once the grace period is over.
//
// Returns whether any relay had to be closed.
async fn drain_connections(
    tracker: &TaskTracker,
    close_connections: &CancellationToken,
    grace_period: Duration,
) -> bool {
    tracker.close();
    if timeout(grace_period, tracker.wait()).await.is_ok() {
        return false;
    }
    warn!(
        connections = tracker.len(),
        "Closing connections that didn't finish in time."
    );
    close_connections.cancel();
    tracker.wait().await;
    true
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut signal_terminate = signal(SignalKind::terminate())?;
    let mut signal_interrupt = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = signal_terminate.recv() => debug!("Received SIGTERM."),
        _ = signal_interrupt.recv() => debug!("Received SIGINT."),
    };
    Ok(())
}

#[cfg(windows)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::windows;

    let mut signal_c = windows::ctrl_c()?;
    let mut signal_break = windows::ctrl_break()?;
    let mut signal_close = windows::ctrl_close()?;
    let mut signal_shutdown = windows::ctrl_shutdown()?;

    tokio::select! {
        _ = signal_c.recv() => debug!("Received CTRL_C."),
        _ = signal_break.recv() => debug!("Received CTRL_BREAK."),
        _ = signal_close.recv() => debug!("Received CTRL_CLOSE."),
        _ = signal_shutdown.recv() => debug!("Received CTRL_SHUTDOWN."),
    };
    Ok(())
}
