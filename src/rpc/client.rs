use crate::domain::{NodeError, NodeHandle};
use crate::rpc::{method, RpcRequest, RpcResponse, RPC_PATH};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Handle to a node elsewhere on the network, speaking the node RPC
/// contract over HTTP.
///
/// The name comes from the discovery announcement or static config and
/// doubles as the roster key; no call is needed to read it. Transport
/// faults map to [`NodeError::Unreachable`] so the fleet can skip the
/// node for the running cycle.
pub struct RemoteNode {
    name: String,
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RemoteNode {
    pub fn new(name: &str, host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.to_owned(),
            url: format!("http://{}:{}{}", host, port, RPC_PATH),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the node for its own idea of its name, for diagnostics.
    pub async fn fetch_name(&self) -> Result<String> {
        let value = self.call(method::NAME, Vec::new()).await?;
        Ok(as_string(method::NAME, value)?)
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, NodeError> {
        let request =
            RpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|error| NodeError::Unreachable(error.to_string()))?;
        if !response.status().is_success() {
            return Err(NodeError::Unreachable(format!(
                "{} answered HTTP {}",
                self.url,
                response.status()
            )));
        }
        let envelope: RpcResponse = response
            .json()
            .await
            .map_err(|error| NodeError::Envelope(error.to_string()))?;
        envelope.into_result()
    }

    async fn switch_call(&self, method: &str, idx: u32) -> Result<i32> {
        let value = self.call(method, vec![json!(idx)]).await?;
        Ok(as_i32(method, value)?)
    }

    async fn count_call(&self, method: &str) -> Result<u32> {
        let value = self.call(method, Vec::new()).await?;
        Ok(as_u32(method, value)?)
    }
}

fn as_i32(method: &str, value: Value) -> Result<i32, NodeError> {
    value
        .as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| {
            NodeError::Envelope(format!("{} returned {}, expected an integer", method, value))
        })
}

fn as_u32(method: &str, value: Value) -> Result<u32, NodeError> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            NodeError::Envelope(format!("{} returned {}, expected a count", method, value))
        })
}

fn as_string(method: &str, value: Value) -> Result<String, NodeError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(NodeError::Envelope(format!(
            "{} returned {}, expected a string",
            method, other
        ))),
    }
}

#[async_trait]
impl NodeHandle for RemoteNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn charger_count(&self) -> Result<u32> {
        self.count_call(method::CHARGER_COUNT).await
    }

    async fn inverter_count(&self) -> Result<u32> {
        self.count_call(method::INVERTER_COUNT).await
    }

    async fn turn_on_charger(&self, idx: u32) -> Result<i32> {
        self.switch_call(method::TURN_ON_CHARGER, idx).await
    }

    async fn turn_off_charger(&self, idx: u32) -> Result<i32> {
        self.switch_call(method::TURN_OFF_CHARGER, idx).await
    }

    async fn turn_on_inverter(&self, idx: u32) -> Result<i32> {
        self.switch_call(method::TURN_ON_INVERTER, idx).await
    }

    async fn turn_off_inverter(&self, idx: u32) -> Result<i32> {
        self.switch_call(method::TURN_OFF_INVERTER, idx).await
    }

    async fn turn_off_all_chargers(&self) -> Result<()> {
        self.call(method::TURN_OFF_ALL_CHARGERS, Vec::new()).await?;
        Ok(())
    }

    async fn turn_off_all_inverters(&self) -> Result<()> {
        self.call(method::TURN_OFF_ALL_INVERTERS, Vec::new())
            .await?;
        Ok(())
    }

    async fn dump_state(&self) -> Result<String> {
        let value = self.call(method::DUMP_STATE, Vec::new()).await?;
        Ok(as_string(method::DUMP_STATE, value)?)
    }
}
