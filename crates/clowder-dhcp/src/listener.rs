//! The UDP broadcast listener: binds `:67`, hands every datagram to the
//! responder under the tables lock, and writes back whatever it returns.
//! Exactly one of these runs at a time — `dhcp_running` on
//! [`crate::state::ServerState`] enforces that (invariant 6).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::responder;
use crate::state::ServerState;

/// A running UDP listener task and the handle to stop it. Held inside
/// `ServerState::dhcp_running` — `Some` means the listener is up.
pub struct RunningListener {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl RunningListener {
    /// Signal the listener to stop and wait for its task to exit. Distinct
    /// from an I/O-error exit: this always completes the `shutdown`
    /// branch of the loop's `select!`, never the read-error branch.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

/// Bind `:67` and spawn the read loop. Does not itself check/flip
/// `dhcp_running` — the TCP control handler (the only caller) holds that
/// mutex across the whole start/stop decision so two DHCPONs can't race.
pub async fn start(state: Arc<ServerState>) -> std::io::Result<RunningListener> {
    let socket = UdpSocket::bind(("0.0.0.0", 67)).await?;
    socket.set_broadcast(true)?;
    info!("DHCP UDP listener bound to 0.0.0.0:67");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(run_loop(socket, state, shutdown_rx));

    Ok(RunningListener {
        shutdown: shutdown_tx,
        handle,
    })
}

async fn run_loop(socket: UdpSocket, state: Arc<ServerState>, mut shutdown: oneshot::Receiver<()>) {
    let mut buf = vec![0u8; 1500];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, src)) => {
                        if handle_datagram(&socket, &state, &buf[..len], src).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("DHCP UDP read error, stopping listener: {e}");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("DHCP UDP listener closed by control command");
                break;
            }
        }
    }
}

#[cfg(test)]
impl RunningListener {
    /// A listener handle with no bound socket behind it, for control-plane
    /// tests that only need to exercise the `dhcp_running` guard logic
    /// without binding the real (privileged) UDP port.
    pub(crate) fn test_stub() -> Self {
        let (shutdown, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let _ = rx.await;
        });
        RunningListener { shutdown, handle }
    }
}

/// Handle one datagram. Returns `Err` only when the reply write fails —
/// per `spec.md` §4.7, a write error stops the listener exactly like a
/// read error does, so the caller breaks its loop on `Err`.
async fn handle_datagram(
    socket: &UdpSocket,
    state: &Arc<ServerState>,
    data: &[u8],
    src: SocketAddr,
) -> std::io::Result<()> {
    if data.len() < 240 {
        debug!(len = data.len(), "undersized DHCP datagram, dropping");
        return Ok(());
    }
    let Some(request) = crate::packet::Packet::parse(data) else {
        debug!("malformed DHCP packet, dropping");
        return Ok(());
    };

    let response = {
        let mut tables = state.tables.lock().await;
        responder::handle(&state.identity, &mut tables, &request)
    };

    let Some(response) = response else {
        return Ok(());
    };

    let src_is_unspecified = match src {
        SocketAddr::V4(v4) => *v4.ip() == Ipv4Addr::UNSPECIFIED,
        SocketAddr::V6(_) => false,
    };
    let dest: SocketAddr = if responder::should_broadcast(&request, src_is_unspecified) {
        (Ipv4Addr::BROADCAST, 68).into()
    } else {
        src
    };

    let bytes = response.to_bytes();
    if let Err(e) = socket.send_to(&bytes, dest).await {
        error!("DHCP UDP write error to {dest}, stopping listener: {e}");
        return Err(e);
    }
    Ok(())
}
