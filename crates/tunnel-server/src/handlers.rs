//! HTTP Handlers
//!
//! The webhook is the payment collaborator's settlement callback. Its
//! status code is the retry protocol: 200 tells the collaborator the
//! settlement was absorbed (including "not paid" probes and duplicate
//! deliveries), anything else asks it to deliver again later.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::fulfill::Outcome;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    pending_invoices: usize,
    connections: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        pending_invoices: state.registry.len(),
        connections: state.connections.len(),
    })
}

/// Settlement webhook body; LNbits posts the payment hash it settled
#[derive(Debug, Deserialize)]
pub struct InvoiceWebhook {
    payment_hash: String,
}

pub async fn invoice_webhook(
    State(state): State<AppState>,
    Json(body): Json<InvoiceWebhook>,
) -> StatusCode {
    tracing::info!(payment_id = %body.payment_hash, "settlement webhook received");

    match state
        .orchestrator
        .on_payment_confirmed(&body.payment_hash)
        .await
    {
        // Absorbed: done, duplicate, racing trigger, or premature probe
        Outcome::Delivered { .. } | Outcome::Busy | Outcome::NotPaid => StatusCode::OK,
        // Ask the collaborator to redeliver once provisioning can succeed
        Outcome::Failed => StatusCode::INTERNAL_SERVER_ERROR,
        // Unrecoverable for this id but redelivery is harmless and the log
        // trail should keep growing while it retries
        Outcome::NotFound => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
