use crate::domain::NodeHandle;
use crate::hardware::Watchdog;
use crate::rpc::{codes, method, RpcRequest, RpcResponse, JSONRPC_VERSION, RPC_PATH};
use anyhow::Result;
use axum::{extract::State, routing::post, Json, Router};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::debug;

/// Shared state behind a node's RPC surface: the device handle plus the
/// watchdog that every served mutation re-arms.
#[derive(Clone)]
pub struct NodeState {
    node: Arc<dyn NodeHandle>,
    watchdog: Watchdog,
}

impl NodeState {
    pub fn new(node: Arc<dyn NodeHandle>, watchdog: Watchdog) -> Self {
        Self { node, watchdog }
    }
}

pub fn router(state: NodeState, request_timeout: Duration) -> Router {
    Router::new()
        .route(RPC_PATH, post(handle_rpc))
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(64 * 1024))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Body is parsed by hand so malformed JSON still gets an in-envelope
/// answer instead of a bare HTTP rejection.
async fn handle_rpc(State(state): State<NodeState>, body: String) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(error) => {
            return Json(RpcResponse::error(
                Value::Null,
                codes::PARSE_ERROR,
                format!("parse error: {}", error),
            ));
        }
    };
    Json(dispatch(&state, request).await)
}

async fn dispatch(state: &NodeState, request: RpcRequest) -> RpcResponse {
    if request.jsonrpc != JSONRPC_VERSION {
        return RpcResponse::error(
            request.id,
            codes::INVALID_REQUEST,
            "jsonrpc must be \"2.0\"",
        );
    }
    let RpcRequest {
        method: name,
        params,
        id,
        ..
    } = request;
    debug!(method = %name, "rpc call");

    // The watchdog is armed here in the dispatch, not inside the bank,
    // so its own all-off never feeds it.
    match name.as_str() {
        method::TURN_ON_CHARGER => {
            state.watchdog.arm();
            match index_param(&params) {
                Ok(idx) => respond(id, state.node.turn_on_charger(idx).await.map(Value::from)),
                Err(message) => RpcResponse::error(id, codes::INVALID_PARAMS, message),
            }
        }
        method::TURN_OFF_CHARGER => {
            state.watchdog.arm();
            match index_param(&params) {
                Ok(idx) => respond(id, state.node.turn_off_charger(idx).await.map(Value::from)),
                Err(message) => RpcResponse::error(id, codes::INVALID_PARAMS, message),
            }
        }
        method::TURN_ON_INVERTER => {
            state.watchdog.arm();
            match index_param(&params) {
                Ok(idx) => respond(id, state.node.turn_on_inverter(idx).await.map(Value::from)),
                Err(message) => RpcResponse::error(id, codes::INVALID_PARAMS, message),
            }
        }
        method::TURN_OFF_INVERTER => {
            state.watchdog.arm();
            match index_param(&params) {
                Ok(idx) => respond(id, state.node.turn_off_inverter(idx).await.map(Value::from)),
                Err(message) => RpcResponse::error(id, codes::INVALID_PARAMS, message),
            }
        }
        method::TURN_OFF_ALL_CHARGERS => {
            state.watchdog.arm();
            respond(
                id,
                state.node.turn_off_all_chargers().await.map(|()| Value::Null),
            )
        }
        method::TURN_OFF_ALL_INVERTERS => {
            state.watchdog.arm();
            respond(
                id,
                state
                    .node
                    .turn_off_all_inverters()
                    .await
                    .map(|()| Value::Null),
            )
        }
        method::CHARGER_COUNT => respond(id, state.node.charger_count().await.map(Value::from)),
        method::INVERTER_COUNT => respond(id, state.node.inverter_count().await.map(Value::from)),
        method::DUMP_STATE => respond(id, state.node.dump_state().await.map(Value::from)),
        method::NAME => RpcResponse::result(id, Value::from(state.node.name())),
        unknown => RpcResponse::error(
            id,
            codes::METHOD_NOT_FOUND,
            format!("unknown method {}", unknown),
        ),
    }
}

fn respond(id: Value, outcome: Result<Value>) -> RpcResponse {
    match outcome {
        Ok(value) => RpcResponse::result(id, value),
        Err(error) => RpcResponse::error(id, codes::INTERNAL_ERROR, error.to_string()),
    }
}

fn index_param(params: &[Value]) -> Result<u32, String> {
    params
        .first()
        .and_then(Value::as_u64)
        .and_then(|idx| u32::try_from(idx).ok())
        .ok_or_else(|| "params[0] must be a device index".to_owned())
}
