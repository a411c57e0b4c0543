//! Connection Gateway
//!
//! WebSocket endpoint speaking a tagged-JSON protocol of named events.
//! Each connection gets exactly one dispatch loop, so request handlers are
//! replaced wholesale on reconnect instead of accumulating. All business
//! logic is delegated to the orchestrator; the gateway only maps events.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

use tunnel_core::ConnectionId;

use crate::state::AppState;

/// Inbound request from the browser
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientRequest {
    #[serde(rename_all = "camelCase")]
    GetInvoice {
        /// Index into the server-side tier table; never a price
        tier: u8,
        public_key: String,
        #[serde(default)]
        preshared_key: Option<String>,
        region: String,
        #[serde(default)]
        is_renew: bool,
        #[serde(default)]
        key_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CheckInvoice { payment_id: String },
    #[serde(rename_all = "camelCase")]
    KeyLookup { public_key: String },
    #[serde(rename_all = "camelCase")]
    SendEmail {
        address: String,
        config: String,
        valid_until: String,
    },
    GetPrice,
}

/// Outbound push to a specific connection
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    InvoiceReady {
        payment_id: String,
        payment_request: String,
        amount_sats: u64,
    },
    #[serde(rename_all = "camelCase")]
    PaymentConfirmed { payment_id: String },
    #[serde(rename_all = "camelCase")]
    ConfigReady { peer_config: serde_json::Value },
    #[serde(rename_all = "camelCase")]
    SubscriptionUpdated { subscription: serde_json::Value },
    #[serde(rename_all = "camelCase")]
    KeyLookupResult { result: Option<KeyLookupResult> },
    #[serde(rename_all = "camelCase")]
    Price { sats_per_unit: Decimal },
    Error { message: String },
}

/// Successful key lookup: where the peer lives and until when
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLookupResult {
    pub key_id: String,
    pub subscription_end: DateTime<Utc>,
    pub dns_name: String,
    pub region: String,
}

/// Live connections and their push channels.
///
/// This is the push primitive the orchestrator delivers through; pushing
/// to a gone connection returns `false` and is never an error (the cached
/// payload replays on the next `check-invoice`).
#[derive(Default)]
pub struct ConnectionMap {
    senders: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnectionId, sender: mpsc::UnboundedSender<ServerEvent>) {
        self.senders.write().unwrap().insert(id, sender);
    }

    pub fn remove(&self, id: ConnectionId) {
        self.senders.write().unwrap().remove(&id);
    }

    /// Push an event to one connection; `false` if it is no longer live
    pub fn push(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let senders = self.senders.read().unwrap();
        match senders.get(&id) {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.senders.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// WebSocket upgrade endpoint
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::new();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.connections.register(connection_id, event_tx);
    tracing::info!(%connection_id, "client connected");

    let (mut sender, mut receiver) = socket.split();

    // Outbound pump: registry pushes -> socket
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(%e, "failed to serialize server event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(%connection_id, %e, "websocket error");
                break;
            }
        };

        match serde_json::from_str::<ClientRequest>(&text) {
            Ok(request) => dispatch(&state, connection_id, request).await,
            Err(e) => {
                state.connections.push(
                    connection_id,
                    ServerEvent::Error {
                        message: format!("malformed request: {e}"),
                    },
                );
            }
        }
    }

    state.connections.remove(connection_id);
    writer.abort();
    tracing::info!(%connection_id, "client disconnected");
}

/// Route one inbound request; every failure path pushes an `error` event
async fn dispatch(state: &AppState, connection_id: ConnectionId, request: ClientRequest) {
    match request {
        ClientRequest::GetInvoice {
            tier,
            public_key,
            preshared_key,
            region,
            is_renew,
            key_id,
        } => {
            let result = state
                .orchestrator
                .open_invoice(
                    connection_id,
                    crate::fulfill::InvoiceParams {
                        tier_index: tier,
                        public_key,
                        preshared_key,
                        region,
                        is_renew,
                        key_id,
                    },
                )
                .await;
            match result {
                Ok(invoice) => {
                    state.connections.push(
                        connection_id,
                        ServerEvent::InvoiceReady {
                            payment_id: invoice.payment_id,
                            payment_request: invoice.payment_request,
                            amount_sats: invoice.amount_sats,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(%connection_id, %e, "get-invoice rejected");
                    push_error(state, connection_id, &e);
                }
            }
        }

        ClientRequest::CheckInvoice { payment_id } => {
            state
                .orchestrator
                .check_invoice(connection_id, &payment_id)
                .await;
        }

        ClientRequest::KeyLookup { public_key } => {
            match state.orchestrator.lookup_key(&public_key).await {
                Ok(result) => {
                    state
                        .connections
                        .push(connection_id, ServerEvent::KeyLookupResult { result });
                }
                Err(e) => {
                    tracing::warn!(%connection_id, %e, "key lookup failed");
                    push_error(state, connection_id, &e);
                }
            }
        }

        ClientRequest::SendEmail {
            address,
            config,
            valid_until,
        } => {
            // Best-effort side channel, not on the critical path
            state.mail.send_config(&address, &config, &valid_until).await;
        }

        ClientRequest::GetPrice => match state.oracle.sats_per_unit().await {
            Ok(sats_per_unit) => {
                state
                    .connections
                    .push(connection_id, ServerEvent::Price { sats_per_unit });
            }
            Err(e) => {
                tracing::warn!(%connection_id, %e, "price quote failed");
                push_error(state, connection_id, &e);
            }
        },
    }
}

fn push_error(state: &AppState, connection_id: ConnectionId, error: &tunnel_core::StoreError) {
    state.connections.push(
        connection_id,
        ServerEvent::Error {
            message: error.user_message(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_invoice_parses() {
        let raw = r#"{
            "type": "get-invoice",
            "tier": 1,
            "publicKey": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
            "presharedKey": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
            "region": "eu",
            "isRenew": false
        }"#;
        match serde_json::from_str::<ClientRequest>(raw).unwrap() {
            ClientRequest::GetInvoice { tier, region, key_id, .. } => {
                assert_eq!(tier, 1);
                assert_eq!(region, "eu");
                assert!(key_id.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_check_invoice_parses() {
        let raw = r#"{"type": "check-invoice", "paymentId": "abc123"}"#;
        assert!(matches!(
            serde_json::from_str::<ClientRequest>(raw).unwrap(),
            ClientRequest::CheckInvoice { payment_id } if payment_id == "abc123"
        ));
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(serde_json::from_str::<ClientRequest>(r#"{"type": "drop-tables"}"#).is_err());
    }

    #[test]
    fn test_event_names_are_kebab_case() {
        let event = ServerEvent::PaymentConfirmed {
            payment_id: "abc".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "payment-confirmed");
        assert_eq!(json["paymentId"], "abc");

        let event = ServerEvent::ConfigReady {
            peer_config: serde_json::json!({"keyID": "7"}),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap()["type"],
            "config-ready"
        );
    }

    #[test]
    fn test_push_to_gone_connection_is_false() {
        let map = ConnectionMap::new();
        let id = ConnectionId::new();
        assert!(!map.push(
            id,
            ServerEvent::Error {
                message: "nobody home".into()
            }
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        map.register(id, tx);
        drop(rx);
        // Channel closed: receiver side hung up
        assert!(!map.push(
            id,
            ServerEvent::Error {
                message: "still nobody".into()
            }
        ));
    }
}
