use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use clowder_core::config::Config;
use clowder_dhcp::pool::LeasePool;
use clowder_dhcp::pxe::PxeTable;
use clowder_dhcp::registry::HardwareRegistry;
use clowder_dhcp::state::{Identity, ServerState, ServerTables};
use clowder_dhcp::{control, store};
use tracing::info;

#[derive(Parser)]
#[command(name = "clowder", about = "PXE-aware DHCP and fleet control service")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/clowder/clowder.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            // No config yet, so `server.log_level`/`server.log` aren't known;
            // install a bare stderr subscriber just so the FATAL tag still reaches a log.
            let _ = tracing_subscriber::fmt::try_init();
            clowder_core::fatal!(path = %cli.config.display(), error = %e, "failed to load config");
            return Err(e.into());
        }
    };
    let _log_guard = clowder_core::logging::init(&config.server);

    info!(
        ip = %config.server.ip,
        control_port = config.server.control_port,
        "starting clowder"
    );

    let bindings = match store::load_bindings(&config.store.bindings_path) {
        Ok(bindings) => bindings,
        Err(e) => {
            clowder_core::fatal!(path = %config.store.bindings_path.display(), error = %e, "failed to load bindings store");
            return Err(e.into());
        }
    };
    let pxe_records = match store::load_pxe(&config.store.pxe_path) {
        Ok(records) => records,
        Err(e) => {
            clowder_core::fatal!(path = %config.store.pxe_path.display(), error = %e, "failed to load PXE store");
            return Err(e.into());
        }
    };
    info!(
        bindings = bindings.len(),
        pxe_records = pxe_records.len(),
        "loaded external tables"
    );

    let mut machines = LeasePool::new(config.machines.ipstart, config.machines.iprange);
    let mut devices = LeasePool::new(config.devices.ipstart, config.devices.iprange);
    for (mac, ip) in &bindings {
        if !machines.bind(mac, *ip) {
            devices.bind(mac, *ip);
        }
    }

    let identity = Identity {
        ip: config.server.ip,
        mask: config.server.subnetmask,
        dns: config.server.dns(),
        router: config.server.router(),
        domain_name: config.server.domainname.clone(),
        server_name: "clowder".to_string(),
        lease_duration_secs: config.duration_secs(),
    };

    let tables = ServerTables {
        machines,
        devices,
        pxe: PxeTable::new(pxe_records),
        registry: HardwareRegistry::new(),
    };

    let state: Arc<ServerState> = ServerState::new(identity, tables, config.server.control_port);

    control::run(state).await?;

    info!("clowder stopped");
    Ok(())
}
