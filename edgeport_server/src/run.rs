use crate::{config::ServerConfig, *};

use compiler_client::ProcessWorkerPool;
use port_listener::AcceptedConnection;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::{broadcast, mpsc},
};
use tracing_subscriber::util::SubscriberInitExt;

use std::{fs::File, path::Path, sync::Arc};

/// Capacity of the queue between the ports and the protocol handlers
const ACCEPT_QUEUE: usize = 1024;

async fn drain_connections(mut connections: mpsc::Receiver<AcceptedConnection>) {
    // No protocol handlers are attached to this binary; connections are logged and closed
    while let Some(conn) = connections.recv().await {
        tracing::info!(port = %conn.port, protocol = %conn.protocol, remote = %conn.remote_addr, "Closing unhandled connection");
    }
}

// The async entry point. `run_server` may fork into the background, so the
// tokio runtime is only created afterwards.
async fn do_run_server(server_config: ServerConfig) -> anyhow::Result<()> {
    crate::tracing_config::build_subscriber(server_config.log.clone())?.init();

    let (index, config_events) = JsonConfigIndex::new(&server_config.system_config);
    let index = Arc::new(index);

    let (connection_send, connection_recv) = mpsc::channel(ACCEPT_QUEUE);
    let protocols = ProtocolTable::tcp(connection_send);

    let server = Server::new(ServerParams {
        backend: server_config.backend.clone(),
        data_dir: server_config.data_dir.clone(),
        runstate_dir: server_config.runstate_dir.clone(),
        internal_runstate_dir: server_config.internal_runstate_dir.clone(),
        max_backend_connections: server_config.max_backend_connections,
        database_index: index.clone(),
        compiler_pool: Arc::new(ProcessWorkerPool::new(
            &server_config.compiler.worker_exe,
            server_config.compiler.max_workers,
        )),
        backend_connector: Arc::new(UnixSocketConnector),
        protocols: protocols.clone(),
        port_timeout: server_config.port_timeout(),
        warm_up: None,
    })?;

    server.init().await?;

    for port_config in &server_config.static_ports {
        let (_, factory) = protocols.lookup(&port_config.protocol)?;
        server.add_static_port(factory.as_ref(), port_config)?;
    }

    if let Err(e) = server.start().await {
        tracing::error!(error = %e, "Server failed to start");
        server.stop().await;
        return Err(e.into());
    }

    let (shutdown_send, _) = broadcast::channel(1);

    let pump_task = tokio::spawn({
        let server = server.clone();
        let shutdown = shutdown_send.subscribe();
        async move { server.run_config_events(config_events, shutdown).await }
    });
    let drain_task = tokio::spawn(drain_connections(connection_recv));

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                tracing::info!("Reloading system configuration");
                if let Err(e) = index.reload().await {
                    tracing::error!(error = %e, "Failed to reload system configuration");
                }
            }
            _ = interrupt.recv() => break,
            _ = terminate.recv() => break,
        }
    }

    tracing::info!("Shutting down");

    // Receivers may already be gone if the pump finished on its own
    let _ = shutdown_send.send(());
    if let Err(e) = pump_task.await {
        tracing::error!(error = %e, "Configuration event pump panicked");
    }

    server.stop().await;

    // Every port holding a connection sender is gone once the server and
    // the protocol table are dropped
    drop(protocols);
    drop(server);
    if let Err(e) = drain_task.await {
        tracing::error!(error = %e, "Connection drain task panicked");
    }

    Ok(())
}

/// Run the server described by the config file at `server_config_path`.
///
/// The config is loaded before anything else so that errors in it are reported
/// on the terminal. Unless `foreground` is set, the process then daemonises,
/// with standard output and error redirected to the files named in the logging
/// section.
///
/// This creates its own tokio runtime, so must not be called from within one.
pub fn run_server(server_config_path: impl AsRef<Path>, foreground: bool) -> anyhow::Result<()> {
    let server_config = ServerConfig::load_file(&server_config_path)?;

    if !server_config.log.dir.is_dir() {
        std::fs::create_dir_all(&server_config.log.dir)?;
    }

    if !foreground {
        let mut daemon = daemonize::Daemonize::new()
            .exit_action(|| println!("Running in background mode"))
            .working_directory(std::env::current_dir()?);

        if let Some(stdout) = &server_config.log.stdout {
            daemon = daemon.stdout(File::create(server_config.log.prefix_file(stdout))?);
        }
        if let Some(stderr) = &server_config.log.stderr {
            daemon = daemon.stderr(File::create(server_config.log.prefix_file(stderr))?);
        }
        if let Some(pidfile) = &server_config.log.pidfile {
            daemon = daemon.pid_file(server_config.log.prefix_file(pidfile));
        }

        daemon.start()?;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(do_run_server(server_config))
}
