use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub meter: MeterConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub node: NodeConfig,
}

/// A node reachable at a fixed address, registered before discovery runs.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticNode {
    pub name: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub tick_seconds: u64,
    /// Nominal draw of one battery charger in watts.
    pub charger_quantum_w: f64,
    /// Nominal output of one micro-inverter in watts.
    pub inverter_quantum_w: f64,
    /// Noise floor for net consumption before the level pumps down.
    pub pump_gap_w: f64,
    /// Tolerated disagreement between reported and computed net watts.
    pub mismatch_threshold_w: f64,
    pub max_chargers: u32,
    pub max_inverters: u32,
    /// Override the configured bounds from fleet totals once at startup.
    pub discover_bounds: bool,
    /// How long to let discovery settle before querying fleet totals.
    pub settle_seconds: u64,
    pub rpc_timeout_seconds: u64,
    #[serde(default)]
    pub nodes: Vec<StaticNode>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 2,
            charger_quantum_w: 200.0,
            inverter_quantum_w: 290.0,
            pump_gap_w: 50.0,
            mismatch_threshold_w: 50.0,
            max_chargers: 6,
            max_inverters: 6,
            discover_bounds: false,
            settle_seconds: 5,
            rpc_timeout_seconds: 5,
            nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterConfig {
    /// `sim` or `http`.
    pub kind: String,
    /// Endpoint returning `{produced_w, consumed_w, net_w?}` for `http`.
    pub url: String,
    pub http_timeout_seconds: u64,
    /// Simulated household base draw in watts.
    pub sim_base_load_w: f64,
    /// Simulated solar output at midday in watts.
    pub sim_solar_peak_w: f64,
    /// Uniform jitter applied to simulated readings.
    pub sim_noise_w: f64,
    /// Seed for reproducible simulated runs; absent means random.
    pub sim_seed: Option<u64>,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            kind: "sim".into(),
            url: "http://127.0.0.1/production.json".into(),
            http_timeout_seconds: 5,
            sim_base_load_w: 350.0,
            sim_solar_peak_w: 2400.0,
            sim_noise_w: 40.0,
            sim_seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    pub enabled: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Unique node name, the roster key fleet-wide.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// GPIO lines wired to battery chargers, in device-index order.
    #[serde(default)]
    pub charger_gpios: Vec<u32>,
    /// GPIO lines wired to micro-inverters, in device-index order.
    #[serde(default)]
    pub inverter_gpios: Vec<u32>,
    /// `memory` or `sysfs`.
    pub driver: String,
    pub watchdog_seconds: u64,
    pub request_timeout_seconds: u64,
    /// Announce this node over mDNS.
    pub advertise: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "ubattery-node".into(),
            host: "0.0.0.0".into(),
            port: 9100,
            charger_gpios: Vec::new(),
            inverter_gpios: Vec::new(),
            driver: "memory".into(),
            watchdog_seconds: 30,
            request_timeout_seconds: 10,
            advertise: true,
        }
    }
}

impl NodeConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("UBATTERY__").split("__"));
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller.tick_seconds == 0 {
            anyhow::bail!("controller.tick_seconds must be nonzero");
        }
        if self.controller.charger_quantum_w <= 0.0 {
            anyhow::bail!("controller.charger_quantum_w must be positive");
        }
        if self.controller.mismatch_threshold_w < 0.0 {
            anyhow::bail!("controller.mismatch_threshold_w must not be negative");
        }
        if self.node.name.trim().is_empty() {
            anyhow::bail!("node.name must not be empty");
        }
        if self.node.watchdog_seconds == 0 {
            anyhow::bail!("node.watchdog_seconds must be nonzero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.controller.tick_seconds, 2);
        assert_eq!(cfg.meter.kind, "sim");
    }

    #[test]
    fn zero_tick_is_rejected() {
        let mut cfg = Config::default();
        cfg.controller.tick_seconds = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_node_name_is_rejected() {
        let mut cfg = Config::default();
        cfg.node.name = "  ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn node_socket_addr_parses() {
        let cfg = NodeConfig {
            host: "127.0.0.1".into(),
            port: 9100,
            ..Default::default()
        };
        assert_eq!(cfg.socket_addr().unwrap().port(), 9100);
    }
}
