pub mod runlevel;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Level};

use crate::config::Config;
use crate::discovery;
use crate::fleet::Fleet;
use crate::meter::{meter_for, PowerMeter};
use crate::rpc::RemoteNode;

pub use runlevel::{Bounds, RunLevelController, Step, Thresholds};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub controller: Arc<BatteryController>,
    pub fleet: Arc<Fleet>,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self> {
        let meter = meter_for(&cfg.meter)?;

        let fleet = Arc::new(Fleet::new());
        let rpc_timeout = Duration::from_secs(cfg.controller.rpc_timeout_seconds);
        for entry in &cfg.controller.nodes {
            let node = RemoteNode::new(&entry.name, &entry.host, entry.port, rpc_timeout)?;
            fleet.register(Arc::new(node)).await;
        }

        let thresholds = Thresholds {
            charger_quantum_w: cfg.controller.charger_quantum_w,
            inverter_quantum_w: cfg.controller.inverter_quantum_w,
            pump_gap_w: cfg.controller.pump_gap_w,
            mismatch_threshold_w: cfg.controller.mismatch_threshold_w,
        };
        let bounds = Bounds::from_counts(cfg.controller.max_inverters, cfg.controller.max_chargers);

        let controller = Arc::new(BatteryController {
            meter,
            fleet: fleet.clone(),
            runlevel: Mutex::new(RunLevelController::new(thresholds, bounds)),
        });

        Ok(Self {
            cfg,
            controller,
            fleet,
        })
    }
}

pub fn spawn_controller_tasks(state: AppState, cfg: Config) {
    let tick_seconds = cfg.controller.tick_seconds;
    let controller = state.controller.clone();
    tokio::spawn(async move {
        if let Err(e) = controller.run(tick_seconds).await {
            warn!(error=%e, "controller loop stopped");
        }
    });

    if cfg.controller.discover_bounds {
        let settle = Duration::from_secs(cfg.controller.settle_seconds);
        let controller = state.controller.clone();
        tokio::spawn(async move {
            controller.discover_bounds(settle).await;
        });
    }

    if cfg.discovery.enabled {
        let rpc_timeout = Duration::from_secs(cfg.controller.rpc_timeout_seconds);
        let fleet = state.fleet.clone();
        tokio::spawn(async move {
            if let Err(e) = discovery::browse(fleet, rpc_timeout).await {
                warn!(error=%e, "mdns browse stopped");
            }
        });
    }
}

/// Ties the meter, the run-level ramp, and the fleet together into the
/// single control loop.
pub struct BatteryController {
    pub meter: Arc<dyn PowerMeter>,
    pub fleet: Arc<Fleet>,
    pub runlevel: Mutex<RunLevelController>,
}

impl BatteryController {
    /// Tick forever. A tick that lands while the previous orchestration
    /// is still in flight is skipped, not queued; the loop never runs
    /// two cycles back to back to catch up.
    pub async fn run(&self, tick_seconds: u64) -> Result<()> {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(tick_seconds.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick_once().await {
                warn!(error=%e, "tick skipped");
            }
        }
    }

    /// One control cycle: sample the meter, step the ramp, drive the
    /// fleet. A discarded sample ends the cycle before any device is
    /// touched.
    pub async fn tick_once(&self) -> Result<()> {
        let sample = self.meter.sample().await?;

        let mut runlevel = self.runlevel.lock().await;
        let step = runlevel.observe(sample);
        if step.is_discarded() {
            return Ok(());
        }
        let level = runlevel.level();
        let swing_w = runlevel.estimated_swing_w();
        drop(runlevel);

        let residual = self.fleet.set_run_level(level).await;
        info!(
            produced_w = sample.produced_w,
            consumed_w = sample.consumed_w,
            net_w = sample.net_w(),
            run_level = level,
            residual,
            swing_w,
            "control tick"
        );
        if tracing::enabled!(Level::DEBUG) {
            let fleet_state = self.fleet.dump_state().await;
            debug!(fleet = %fleet_state, "fleet state");
        }
        Ok(())
    }

    /// Replace the configured bounds with what the fleet actually has,
    /// once the roster has had time to settle. An empty answer keeps the
    /// configured bounds; discovery may simply not have finished.
    pub async fn discover_bounds(&self, settle: Duration) {
        tokio::time::sleep(settle).await;
        let (chargers, inverters) = self.fleet.total_counts().await;
        if chargers == 0 && inverters == 0 {
            warn!("no devices reported, keeping configured bounds");
            return;
        }
        let bounds = Bounds::from_counts(inverters, chargers);
        self.runlevel.lock().await.set_bounds(bounds);
        info!(min = bounds.min, max = bounds.max, "bounds taken from fleet counts");
    }

    pub async fn level(&self) -> i32 {
        self.runlevel.lock().await.level()
    }

    /// Best-effort switch-off on the way out. The node watchdogs remain
    /// the backstop if this times out.
    pub async fn shutdown_fleet(&self, deadline: Duration) {
        match tokio::time::timeout(deadline, self.fleet.set_run_level(0)).await {
            Ok(_) => info!("fleet switched off"),
            Err(_) => warn!("fleet switch-off timed out"),
        }
    }
}
