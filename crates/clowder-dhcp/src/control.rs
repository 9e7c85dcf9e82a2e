//! The TCP control plane: one line-oriented connection handler per
//! accepted socket, executing `DHCPON` / `DHCPOFF` / `LEASES` /
//! `NEWHARDWARE` / `STATUS` / `CLOSECONN` / `STOPCLOWDER` against the
//! shared [`ServerState`].

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{error, info, warn};

use clowder_core::{Error, Result};

use crate::listener;
use crate::state::ServerState;

const INVALID_COMMAND: &str = "INVALID COMMAND.\nUSE: DHCPON DHCPOFF LEASES NEWHARDWARE STATUS CLOSECONN STOPCLOWDER\n";
const START_GRACE: Duration = Duration::from_secs(5);

/// Bind the control port and accept connections until `STOPCLOWDER`
/// fires. One handler task per connection; the shutdown signal is a
/// close-only broadcast (`watch<bool>`) cloned into every handler so
/// `STOPCLOWDER` can terminate them all at once.
pub async fn run(state: Arc<ServerState>) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", state.control_port))
        .await
        .map_err(|e| Error::FatalInit(format!("failed to bind control port {}: {e}", state.control_port)))?;
    info!("control server listening on 0.0.0.0:{}", state.control_port);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    loop {
        let mut accept_shutdown = shutdown_rx.clone();
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let state = state.clone();
                        let tx = shutdown_tx.clone();
                        let rx = shutdown_rx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state, tx, rx).await {
                                warn!("control connection {addr} error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        // Listener closed by STOPCLOWDER vs. a genuine accept
                        // error: only the former sets the shutdown flag.
                        if *shutdown_rx.borrow() {
                            info!("control listener closed");
                            break;
                        }
                        error!("control accept error: {e}");
                    }
                }
            }
            _ = accept_shutdown.changed() => {
                if *accept_shutdown.borrow() {
                    info!("control listener closing");
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if ctrl_c.is_err() {
                    continue;
                }
                info!("SIGINT received, stopping DHCP and closing control server");
                dhcp_off(&state).await;
                let _ = shutdown_tx.send(true);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(raw) = line? else {
                    break; // peer closed
                };
                let cmd = raw.trim_end_matches(['\r', '\n']).trim();
                let (response, close) = execute(cmd, &state, &shutdown_tx).await;
                write_half.write_all(response.as_bytes()).await?;
                if close {
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn execute(
    cmd: &str,
    state: &Arc<ServerState>,
    shutdown_tx: &Arc<watch::Sender<bool>>,
) -> (String, bool) {
    match cmd {
        "DHCPON" => (dhcp_on(state).await, false),
        "DHCPOFF" => (dhcp_off(state).await, false),
        "LEASES" => (leases(state).await, false),
        "NEWHARDWARE" => (new_hardware(state).await, false),
        "STATUS" => (status(state).await, false),
        "CLOSECONN" => ("DONE\n".to_string(), true),
        "STOPCLOWDER" => {
            dhcp_off(state).await;
            let _ = shutdown_tx.send(true);
            ("CLOWDER closing...\n".to_string(), true)
        }
        _ => (INVALID_COMMAND.to_string(), false),
    }
}

async fn dhcp_on(state: &Arc<ServerState>) -> String {
    let mut running = state.dhcp_running.lock().await;
    if running.is_some() {
        error!("DHCPON requested while DHCP already running");
        return "DONE\n".to_string();
    }
    match listener::start(state.clone()).await {
        Ok(handle) => {
            *running = Some(handle);
            drop(running);
            tokio::time::sleep(START_GRACE).await;
            "DONE\n".to_string()
        }
        Err(e) => {
            error!("failed to start DHCP listener: {e}");
            "DONE\n".to_string()
        }
    }
}

async fn dhcp_off(state: &Arc<ServerState>) -> String {
    let mut running = state.dhcp_running.lock().await;
    match running.take() {
        Some(handle) => {
            handle.stop().await;
            "DONE\n".to_string()
        }
        None => {
            error!("DHCPOFF requested while DHCP not running");
            "DONE\n".to_string()
        }
    }
}

async fn leases(state: &Arc<ServerState>) -> String {
    let tables = state.tables.lock().await;
    format!("{}{}", tables.machines.export(), tables.devices.export())
}

async fn new_hardware(state: &Arc<ServerState>) -> String {
    let tables = state.tables.lock().await;
    tables.registry.export()
}

async fn status(state: &Arc<ServerState>) -> String {
    let running = state.dhcp_running.lock().await.is_some();
    let tables = state.tables.lock().await;
    let id = &state.identity;
    format!(
        "server.ip\t{}\nserver.mask\t{}\nserver.dns\t{}\nserver.router\t{}\nserver.domain\t{}\ndhcp.running\t{}\n\n[leases]\n{}{}\n[pxe]\n{}",
        id.ip,
        id.mask,
        id.dns,
        id.router,
        id.domain_name,
        running,
        tables.machines.export(),
        tables.devices.export(),
        tables.pxe.export(),
    )
}
