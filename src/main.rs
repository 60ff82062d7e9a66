use anyhow::Result;
use std::time::Duration;
use tracing::{info, warn};
use ubattery::{config, controller, telemetry};

use config::Config;
use telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;

    let app_state = controller::AppState::new(cfg.clone()).await?;

    info!(
        tick_seconds = cfg.controller.tick_seconds,
        static_nodes = cfg.controller.nodes.len(),
        mdns = cfg.discovery.enabled,
        meter = %cfg.meter.kind,
        "starting uBattery controller"
    );

    controller::spawn_controller_tasks(app_state.clone(), cfg.clone());

    telemetry::shutdown_signal().await;

    let deadline = Duration::from_secs(cfg.controller.rpc_timeout_seconds.max(1));
    app_state.controller.shutdown_fleet(deadline).await;

    warn!("shutdown complete");
    Ok(())
}
