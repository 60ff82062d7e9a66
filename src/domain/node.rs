use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Node-call errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Node unreachable: {0}")]
    Unreachable(String),
    #[error("Remote fault {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("Malformed response envelope: {0}")]
    Envelope(String),
}

/// The two switchable device kinds a node can own. The sets are disjoint:
/// a relay line is wired either to a charger or to a micro-inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    Charger,
    Inverter,
}

impl DeviceKind {
    /// Contribution a successful activation reports: chargers count +1
    /// toward the run level, inverters -1. The orchestrator subtracts the
    /// reported value uniformly in both directions.
    pub fn contribution(&self) -> i32 {
        match self {
            DeviceKind::Charger => 1,
            DeviceKind::Inverter => -1,
        }
    }
}

/// Capability surface of one controller node, local or remote.
///
/// Switch calls resolve with the node's reported contribution (+1 charger,
/// -1 inverter, 0 when the device refused or the index is out of range).
/// An unreachable node rejects the call instead of defaulting; callers
/// treat that as "skip this node for the rest of the cycle".
#[async_trait]
pub trait NodeHandle: Send + Sync {
    /// Unique node name, the roster key.
    fn name(&self) -> &str;

    async fn charger_count(&self) -> Result<u32>;
    async fn inverter_count(&self) -> Result<u32>;

    async fn turn_on_charger(&self, idx: u32) -> Result<i32>;
    async fn turn_off_charger(&self, idx: u32) -> Result<i32>;
    async fn turn_on_inverter(&self, idx: u32) -> Result<i32>;
    async fn turn_off_inverter(&self, idx: u32) -> Result<i32>;

    async fn turn_off_all_chargers(&self) -> Result<()>;
    async fn turn_off_all_inverters(&self) -> Result<()>;

    /// One-line rendering of the node's relay states, for operator logs.
    async fn dump_state(&self) -> Result<String>;
}
