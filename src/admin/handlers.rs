use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::networks::{AccountBalance, ChainId, FeeQuote};
use crate::orchestrator::{NonceView, OrchestratorError, TxSummary};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub networks: Vec<NetworkStatus>,
    pub tracked_transactions: usize,
    pub active_reservations: usize,
}

#[derive(Serialize)]
pub struct NetworkStatus {
    pub chain_id: ChainId,
    pub name: String,
    pub connected: bool,
    pub healthy: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let orchestrator = &state.orchestrator;
    let mut networks = Vec::new();
    for network in orchestrator.networks().all() {
        let gateway = orchestrator.gateways().get(network.chain_id);
        let healthy = match &gateway {
            Some(gateway) => gateway.is_healthy().await,
            None => false,
        };
        networks.push(NetworkStatus {
            chain_id: network.chain_id,
            name: network.name.clone(),
            connected: gateway.is_some(),
            healthy,
        });
    }
    networks.sort_by_key(|n| n.chain_id);

    let status = if networks.iter().any(|n| n.connected && !n.healthy) {
        "degraded"
    } else {
        "operational"
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status,
        networks,
        tracked_transactions: orchestrator.activity().len(),
        active_reservations: orchestrator.nonces().active_reservations(),
    })
}

pub async fn get_balances(State(state): State<AdminState>) -> Json<Vec<AccountBalance>> {
    Json(state.balances.all())
}

pub async fn get_transactions(State(state): State<AdminState>) -> Json<Vec<TxSummary>> {
    Json(state.orchestrator.activity())
}

pub async fn get_nonces(State(state): State<AdminState>) -> Json<Vec<NonceView>> {
    Json(state.orchestrator.nonces().snapshot())
}

pub async fn get_fees(
    State(state): State<AdminState>,
    Path(chain_id): Path<u64>,
) -> Result<Json<Vec<FeeQuote>>, (StatusCode, String)> {
    match state.orchestrator.fee_quotes(ChainId(chain_id)).await {
        Ok(quotes) => Ok(Json(quotes)),
        Err(e @ (OrchestratorError::UnknownNetwork(_) | OrchestratorError::NotConnected(_))) => {
            Err((StatusCode::NOT_FOUND, e.to_string()))
        }
        Err(e) => {
            tracing::warn!(chain_id, error = %e, "Fee quote failed");
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}
