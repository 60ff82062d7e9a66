pub mod http;
pub mod sim;

pub use http::HttpMeter;
pub use sim::SimulatedMeter;

use crate::config::MeterConfig;
use crate::domain::PowerSample;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Source of house power samples.
#[async_trait]
pub trait PowerMeter: Send + Sync {
    async fn sample(&self) -> Result<PowerSample>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MeterKind {
    Sim,
    Http,
}

/// Build the configured meter.
pub fn meter_for(cfg: &MeterConfig) -> Result<Arc<dyn PowerMeter>> {
    let kind: MeterKind = cfg
        .kind
        .parse()
        .ok()
        .with_context(|| format!("unknown meter kind {:?}, expected sim or http", cfg.kind))?;
    Ok(match kind {
        MeterKind::Sim => Arc::new(SimulatedMeter::new(cfg)),
        MeterKind::Http => Arc::new(HttpMeter::new(cfg)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_builds_configured_kind() {
        let mut cfg = MeterConfig::default();
        assert!(meter_for(&cfg).is_ok());

        cfg.kind = "http".into();
        assert!(meter_for(&cfg).is_ok());

        cfg.kind = "modbus".into();
        assert!(meter_for(&cfg).is_err());
    }
}
