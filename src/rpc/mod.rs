//! JSON-RPC 2.0 envelope shared by the node server and the controller
//! client. Requests POST to [`RPC_PATH`]; every call is answered with a
//! single result envelope, transport faults aside.

pub mod client;
pub mod server;

pub use client::RemoteNode;
pub use server::{router, NodeState};

use crate::domain::NodeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RPC_PATH: &str = "/rpc";
pub const JSONRPC_VERSION: &str = "2.0";

/// Wire method names, one per node operation.
pub mod method {
    pub const TURN_ON_CHARGER: &str = "turnOnCharger";
    pub const TURN_OFF_CHARGER: &str = "turnOffCharger";
    pub const TURN_ON_INVERTER: &str = "turnOnInverter";
    pub const TURN_OFF_INVERTER: &str = "turnOffInverter";
    pub const TURN_OFF_ALL_CHARGERS: &str = "turnOffAllChargers";
    pub const TURN_OFF_ALL_INVERTERS: &str = "turnOffAllInverters";
    pub const CHARGER_COUNT: &str = "chargerCount";
    pub const INVERTER_COUNT: &str = "inverterCount";
    pub const DUMP_STATE: &str = "dumpState";
    pub const NAME: &str = "name";
}

/// JSON-RPC 2.0 error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    /// Echoed verbatim in the response; callers are free to use strings.
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.to_owned(),
            params,
            id: Value::from(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Value,
}

impl RpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }

    /// Unwrap the envelope: a carried error becomes [`NodeError::Remote`],
    /// otherwise the result value is returned. A missing result field
    /// reads as JSON null, matching servers that answer void calls with
    /// no value.
    pub fn into_result(self) -> Result<Value, NodeError> {
        if let Some(error) = self.error {
            return Err(NodeError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}
