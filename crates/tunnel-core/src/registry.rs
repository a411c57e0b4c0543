//! Invoice Registry
//!
//! The single shared mutable resource in the system: a bounded, time-purged
//! table correlating payment identifiers to pending fulfillment requests and
//! the connection that should receive the result.
//!
//! Entries live until the underlying invoice expires, fulfilled or not, so a
//! client that dropped its connection mid-payment can reconnect and replay
//! the cached result. Capacity is enforced on registration (reject, never
//! evict) to bound memory against invoice-spam.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::keys::WgKey;
use crate::tier::Tier;

/// Identity of a live client connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a paid invoice buys
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    NewSubscription,
    RenewSubscription,
}

/// Fulfillment state of a pending request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FulfillmentState {
    /// Invoice issued, payment not yet acted on
    Pending,
    /// A trigger claimed this entry and is provisioning right now
    InFlight,
    /// Provisioning succeeded; payload is immutable from here on
    Fulfilled(serde_json::Value),
}

/// A client request awaiting payment and fulfillment
#[derive(Clone, Debug)]
pub struct PendingRequest {
    /// Payment identifier assigned by the payment collaborator; primary key
    pub payment_id: String,
    /// Connection that should receive the result
    pub connection_id: ConnectionId,
    pub kind: RequestKind,
    pub public_key: WgKey,
    /// Required for new subscriptions, absent for renewals
    pub preshared_key: Option<WgKey>,
    pub tier: Tier,
    /// Region code selecting the target VPN-manager endpoint
    pub region: String,
    /// Existing peer record id, renewals only
    pub key_id: Option<String>,
    /// Satoshis charged, computed server-side
    pub amount_sats: u64,
    pub created_at: DateTime<Utc>,
    /// Expiry embedded in the invoice itself; drives the purge sweep
    pub invoice_expires_at: DateTime<Utc>,
    pub state: FulfillmentState,
}

impl PendingRequest {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self.state, FulfillmentState::Fulfilled(_))
    }
}

/// Outcome of claiming a payment id for provisioning
#[derive(Clone, Debug)]
pub enum Claim {
    /// Caller owns provisioning for this entry; must `mark_fulfilled` or
    /// `release` when done
    Claimed(PendingRequest),
    /// Already fulfilled; deliver the cached payload, do not provision
    Replay(serde_json::Value),
    /// Another trigger is provisioning this entry right now
    Busy,
    /// No such payment id
    NotFound,
}

/// Bounded, time-purged table of pending requests keyed by payment id
pub struct InvoiceRegistry {
    entries: RwLock<HashMap<String, PendingRequest>>,
    capacity: usize,
}

impl InvoiceRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Insert a new pending request, rejecting when at capacity.
    ///
    /// Existing entries are never evicted or overwritten.
    pub fn register(&self, entry: PendingRequest) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        if entries.len() >= self.capacity {
            return Err(StoreError::Capacity(entries.len()));
        }
        if entries.contains_key(&entry.payment_id) {
            return Err(StoreError::Validation(format!(
                "duplicate payment id {}",
                entry.payment_id
            )));
        }
        tracing::debug!(
            payment_id = %entry.payment_id,
            connection_id = %entry.connection_id,
            kind = ?entry.kind,
            "registered pending request"
        );
        entries.insert(entry.payment_id.clone(), entry);
        Ok(())
    }

    pub fn find(&self, payment_id: &str) -> Option<PendingRequest> {
        self.entries.read().unwrap().get(payment_id).cloned()
    }

    /// Atomically claim an entry for provisioning.
    ///
    /// This is the check-then-act point of the whole system: the state
    /// transition happens under a single write lock, so a webhook racing a
    /// client re-check resolves to exactly one `Claimed`.
    pub fn claim(&self, payment_id: &str) -> Claim {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(payment_id) {
            None => Claim::NotFound,
            Some(entry) => match &entry.state {
                FulfillmentState::Fulfilled(payload) => Claim::Replay(payload.clone()),
                FulfillmentState::InFlight => Claim::Busy,
                FulfillmentState::Pending => {
                    entry.state = FulfillmentState::InFlight;
                    Claim::Claimed(entry.clone())
                }
            },
        }
    }

    /// Return a claimed entry to `Pending` after a provisioning failure so
    /// the next trigger retries from scratch
    pub fn release(&self, payment_id: &str) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(payment_id) {
            if entry.state == FulfillmentState::InFlight {
                entry.state = FulfillmentState::Pending;
            }
        }
    }

    /// Attach the provisioning result and mark the entry fulfilled.
    ///
    /// A second call for an already-fulfilled entry is a no-op, not an
    /// error: the payment collaborator delivers webhooks at-least-once.
    pub fn mark_fulfilled(&self, payment_id: &str, payload: serde_json::Value) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(payment_id) {
            None => Err(StoreError::NotFound(payment_id.to_string())),
            Some(entry) => {
                if !entry.is_fulfilled() {
                    entry.state = FulfillmentState::Fulfilled(payload);
                }
                Ok(())
            }
        }
    }

    /// Re-target delivery at a reconnecting client's new connection
    pub fn rebind_connection(&self, payment_id: &str, connection_id: ConnectionId) -> bool {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(payment_id) {
            Some(entry) => {
                entry.connection_id = connection_id;
                true
            }
            None => false,
        }
    }

    /// Drop every entry whose invoice has expired, fulfilled or not.
    ///
    /// Returns the number of purged entries. Runs under one write lock for
    /// a single table scan; safe to overlap with request handling.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.invoice_expires_at > now);
        let purged = before - entries.len();
        if purged > 0 {
            tracing::debug!(purged, remaining = entries.len(), "purged expired invoices");
        }
        purged
    }

    /// True when a new registration would be rejected.
    ///
    /// Checked before contacting the payment collaborator so a full
    /// registry never produces an orphan invoice; `register` still
    /// enforces the cap in case of a race.
    pub fn at_capacity(&self) -> bool {
        self.entries.read().unwrap().len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    fn entry(payment_id: &str, expires_in: Duration) -> PendingRequest {
        let now = Utc::now();
        PendingRequest {
            payment_id: payment_id.into(),
            connection_id: ConnectionId::new(),
            kind: RequestKind::NewSubscription,
            public_key: WgKey::parse(KEY).unwrap(),
            preshared_key: Some(WgKey::parse(KEY).unwrap()),
            tier: Tier::ThreeMonths,
            region: "eu".into(),
            key_id: None,
            amount_sats: 21_000,
            created_at: now,
            invoice_expires_at: now + expires_in,
            state: FulfillmentState::Pending,
        }
    }

    #[test]
    fn test_capacity_rejects_without_evicting() {
        let registry = InvoiceRegistry::new(100);
        for i in 0..100 {
            registry
                .register(entry(&format!("hash-{i}"), Duration::minutes(10)))
                .unwrap();
        }
        assert!(matches!(
            registry.register(entry("hash-overflow", Duration::minutes(10))),
            Err(StoreError::Capacity(100))
        ));
        assert_eq!(registry.len(), 100);
        assert!(registry.find("hash-0").is_some());
        assert!(registry.find("hash-overflow").is_none());
    }

    #[test]
    fn test_duplicate_payment_id_rejected() {
        let registry = InvoiceRegistry::new(10);
        registry.register(entry("hash-1", Duration::minutes(10))).unwrap();
        assert!(matches!(
            registry.register(entry("hash-1", Duration::minutes(10))),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_claim_transitions() {
        let registry = InvoiceRegistry::new(10);
        registry.register(entry("hash-1", Duration::minutes(10))).unwrap();

        // First claim wins
        assert!(matches!(registry.claim("hash-1"), Claim::Claimed(_)));
        // Concurrent trigger sees the in-flight claim
        assert!(matches!(registry.claim("hash-1"), Claim::Busy));

        registry
            .mark_fulfilled("hash-1", serde_json::json!({"port": 51820}))
            .unwrap();

        // Later triggers replay the cached payload
        match registry.claim("hash-1") {
            Claim::Replay(payload) => assert_eq!(payload["port"], 51820),
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[test]
    fn test_release_allows_retry() {
        let registry = InvoiceRegistry::new(10);
        registry.register(entry("hash-1", Duration::minutes(10))).unwrap();

        assert!(matches!(registry.claim("hash-1"), Claim::Claimed(_)));
        registry.release("hash-1");
        assert!(matches!(registry.claim("hash-1"), Claim::Claimed(_)));
    }

    #[test]
    fn test_mark_fulfilled_is_idempotent_and_immutable() {
        let registry = InvoiceRegistry::new(10);
        registry.register(entry("hash-1", Duration::minutes(10))).unwrap();

        let payload = serde_json::json!({"peer": "a"});
        registry.mark_fulfilled("hash-1", payload.clone()).unwrap();
        // Duplicate webhook delivery: no error, payload unchanged
        registry
            .mark_fulfilled("hash-1", serde_json::json!({"peer": "b"}))
            .unwrap();

        match registry.claim("hash-1") {
            Claim::Replay(replayed) => assert_eq!(replayed, payload),
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[test]
    fn test_mark_fulfilled_unknown_id() {
        let registry = InvoiceRegistry::new(10);
        assert!(matches!(
            registry.mark_fulfilled("missing", serde_json::json!({})),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_purge_drops_only_expired() {
        let registry = InvoiceRegistry::new(10);
        registry.register(entry("expired", Duration::minutes(-1))).unwrap();
        registry.register(entry("live", Duration::minutes(10))).unwrap();

        assert_eq!(registry.purge_expired(Utc::now()), 1);
        assert!(registry.find("expired").is_none());
        assert!(registry.find("live").is_some());

        // Unexpired entries survive any number of sweeps
        for _ in 0..5 {
            assert_eq!(registry.purge_expired(Utc::now()), 0);
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_purge_drops_expired_even_if_fulfilled() {
        let registry = InvoiceRegistry::new(10);
        registry.register(entry("hash-1", Duration::minutes(-1))).unwrap();
        registry
            .mark_fulfilled("hash-1", serde_json::json!({"peer": "a"}))
            .unwrap();
        assert_eq!(registry.purge_expired(Utc::now()), 1);
    }

    #[test]
    fn test_rebind_connection() {
        let registry = InvoiceRegistry::new(10);
        registry.register(entry("hash-1", Duration::minutes(10))).unwrap();

        let reconnected = ConnectionId::new();
        assert!(registry.rebind_connection("hash-1", reconnected));
        assert_eq!(registry.find("hash-1").unwrap().connection_id, reconnected);
        assert!(!registry.rebind_connection("missing", reconnected));
    }
}
