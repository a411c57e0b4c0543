//! Shared Application State

use std::sync::Arc;

use tunnel_core::InvoiceRegistry;
use tunnel_payments::PriceOracle;

use crate::fulfill::Orchestrator;
use crate::gateway::ConnectionMap;
use crate::notify::MailSink;

/// Handler-visible state; everything is `Arc`ed so axum can clone it per
/// request
#[derive(Clone)]
pub struct AppState {
    pub connections: Arc<ConnectionMap>,
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<InvoiceRegistry>,
    pub oracle: Arc<PriceOracle>,
    pub mail: Arc<dyn MailSink>,
}
