use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use ubattery::{config, discovery, hardware, rpc, telemetry};

use config::Config;
use hardware::{driver_for, HardwareDescriptor, LocalNode, RelayBank, RelayMode, Watchdog};
use telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;
    let node_cfg = cfg.node.clone();

    let descriptor = HardwareDescriptor {
        name: node_cfg.name.clone(),
        charger_gpios: node_cfg.charger_gpios.clone(),
        inverter_gpios: node_cfg.inverter_gpios.clone(),
    };
    let mode: RelayMode = node_cfg.driver.parse().ok().with_context(|| {
        format!(
            "unknown relay driver {:?}, expected memory or sysfs",
            node_cfg.driver
        )
    })?;
    let bank = Arc::new(RelayBank::new(descriptor, driver_for(mode))?);

    let watchdog = Watchdog::spawn(
        bank.clone(),
        Duration::from_secs(node_cfg.watchdog_seconds),
    );
    let node = Arc::new(LocalNode::new(bank.clone()));
    let app = rpc::router(
        rpc::NodeState::new(node, watchdog),
        Duration::from_secs(node_cfg.request_timeout_seconds),
    );

    let _announcer = if node_cfg.advertise {
        match discovery::Announcer::announce(
            &node_cfg.name,
            node_cfg.port,
            bank.charger_count(),
            bank.inverter_count(),
        ) {
            Ok(announcer) => Some(announcer),
            Err(error) => {
                warn!(error=%error, "mDNS announce failed, serving without discovery");
                None
            }
        }
    } else {
        None
    };

    let addr = node_cfg.socket_addr()?;
    info!(
        %addr,
        node = %node_cfg.name,
        chargers = bank.charger_count(),
        inverters = bank.inverter_count(),
        driver = %node_cfg.driver,
        watchdog_seconds = node_cfg.watchdog_seconds,
        "starting uBattery node"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    if let Err(error) = bank.all_off() {
        warn!(error=%error, "final all-off failed");
    }
    warn!("shutdown complete");
    Ok(())
}
