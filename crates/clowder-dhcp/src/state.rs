//! The data the responder and control server both operate on: pools, PXE
//! table, and hardware registry, plus the network identity the responder
//! stamps into every reply. `spec.md` calls this `ServerState`; here it is
//! split into an immutable [`Identity`] (never touched after startup) and
//! a mutable [`ServerTables`] guarded by a single [`tokio::sync::Mutex`] —
//! acquiring that mutex for the duration of one packet or one control
//! command is the direct analogue of the original's single-slot
//! `tablesAccess` channel.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::pool::LeasePool;
use crate::pxe::PxeTable;
use crate::registry::HardwareRegistry;

/// Network identity and timing parameters stamped into every response.
/// Read-only after construction.
#[derive(Debug, Clone)]
pub struct Identity {
    pub ip: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub dns: Ipv4Addr,
    pub router: Ipv4Addr,
    pub domain_name: String,
    pub server_name: String,
    pub lease_duration_secs: u32,
}

/// The pools, PXE table, and hardware registry, held under one lock.
pub struct ServerTables {
    pub machines: LeasePool,
    pub devices: LeasePool,
    pub pxe: PxeTable,
    pub registry: HardwareRegistry,
}

/// Shared server state: identity, tables-under-lock, and the
/// `dhcp_running` lifecycle flag (see [`crate::listener`]).
pub struct ServerState {
    pub identity: Identity,
    pub tables: Mutex<ServerTables>,
    pub dhcp_running: Mutex<Option<crate::listener::RunningListener>>,
    pub control_port: u16,
}

impl ServerState {
    pub fn new(identity: Identity, tables: ServerTables, control_port: u16) -> Arc<Self> {
        Arc::new(ServerState {
            identity,
            tables: Mutex::new(tables),
            dhcp_running: Mutex::new(None),
            control_port,
        })
    }
}
