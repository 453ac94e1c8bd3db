//! HTTP API for faucet service

use crate::error::{FaucetError, FaucetResult};
use crate::rpc::{ChainClient, RpcError};
use crate::service::FaucetService;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use drip_common::utils::converter::parse_recipient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Upper bound on the readiness probe.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Fund request
#[derive(Debug, Deserialize)]
pub struct FundRequest {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub build: String,
    #[serde(rename = "n")]
    pub last_block_number: u64,
    #[serde(rename = "time")]
    pub last_block_time: String,
    pub host: String,
    pub service_version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub faucet: Arc<FaucetService>,
    pub chain: Arc<dyn ChainClient>,
    pub build: String,
}

/// Builds the service router. `*` in `allowed_origins` allows any origin.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/fund", post(fund_handler))
        .route("/liveness", get(liveness_handler))
        .route("/readiness", get(readiness_handler))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.iter().any(|origin| origin == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid allowed origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// `POST /fund`: 201 with an empty body once the transfer is sent.
pub async fn fund_handler(
    State(state): State<AppState>,
    request: Result<Json<FundRequest>, JsonRejection>,
) -> FaucetResult<StatusCode> {
    let Json(request) = request.map_err(|e| FaucetError::InvalidRequest(e.body_text()))?;
    info!(address = %request.address, "fund request");

    let target = parse_recipient(request.address.trim())?;

    // Run detached so a dropped connection cannot interrupt a disbursement
    // between transfer and counter update.
    let faucet = state.faucet.clone();
    let outcome = tokio::spawn(async move { faucet.fund_address(target).await })
        .await
        .map_err(|e| FaucetError::Internal(format!("disbursement task failed: {}", e)))?;

    match outcome {
        Ok(disbursement) => {
            info!(address = %disbursement.address, tx_hash = %disbursement.tx_hash, "fund request served");
            Ok(StatusCode::CREATED)
        }
        Err(e) => {
            error!(address = %target, code = e.code(), error = %e, "fund request failed");
            Err(e)
        }
    }
}

/// `GET /liveness`: latest block and build information.
pub async fn liveness_handler(State(state): State<AppState>) -> FaucetResult<Json<LivenessResponse>> {
    let block = state.chain.latest_block().await.map_err(|e| {
        info!(status = "eth client not ready", error = %e, "liveness failure");
        FaucetError::from(e)
    })?;

    let last_block_time = Utc
        .timestamp_opt(i64::try_from(block.timestamp).unwrap_or(i64::MAX), 0)
        .single()
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| block.timestamp.to_string());

    Ok(Json(LivenessResponse {
        build: state.build.clone(),
        last_block_number: block.number,
        last_block_time,
        host: hostname(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

/// `GET /readiness`: ok once the chain answers within [`READINESS_TIMEOUT`].
pub async fn readiness_handler(State(state): State<AppState>) -> FaucetResult<Json<ReadinessResponse>> {
    let probe = tokio::time::timeout(READINESS_TIMEOUT, state.chain.latest_block()).await;
    match probe {
        Ok(Ok(_)) => Ok(Json(ReadinessResponse {
            status: "ok".to_string(),
        })),
        Ok(Err(e)) => {
            info!(status = "eth client not ready", error = %e, "readiness failure");
            Err(e.into())
        }
        Err(_) => {
            info!(status = "eth client not ready", "readiness probe timed out");
            Err(RpcError::Transport(format!("no block within {:?}", READINESS_TIMEOUT)).into())
        }
    }
}

/// `HOSTNAME`, then `/etc/hostname` (Linux only), else "unavailable".
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "unavailable".to_string())
}
