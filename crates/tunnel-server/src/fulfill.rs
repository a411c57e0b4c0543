//! Fulfillment Orchestrator
//!
//! Drives the invoice-to-delivery state machine: opening invoices for
//! validated requests, and on payment confirmation (webhook or client
//! re-check) provisioning exactly once and pushing the result to the
//! connection recorded in the registry.
//!
//! The multi-step sequence suspends at every collaborator call, so it is a
//! chain of idempotent steps rather than a transaction: the registry's
//! `claim` keeps concurrent triggers to one in-flight provisioning, and a
//! failed attempt is released for the next trigger to retry from scratch
//! (provisioning is create-or-update by public key on the manager side).

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use tunnel_core::error::{Result, StoreError};
use tunnel_core::{
    Claim, ConnectionId, FulfillmentState, InvoiceRegistry, PendingRequest, PriceTable,
    RequestKind, Tier, WgKey, compute_expiry, format_manager_date,
};
use tunnel_payments::{Invoice, PaymentApi, PriceOracle};
use tunnel_wgapi::VpnManager;

use crate::gateway::{ConnectionMap, KeyLookupResult, ServerEvent};
use crate::notify::Notifier;

/// Validated-on-entry parameters of a `get-invoice` request
#[derive(Clone, Debug)]
pub struct InvoiceParams {
    pub tier_index: u8,
    pub public_key: String,
    pub preshared_key: Option<String>,
    pub region: String,
    pub is_renew: bool,
    pub key_id: Option<String>,
}

/// What a payment-confirmed trigger amounted to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Result delivered (or cached for replay); `replay` when no
    /// provisioning was needed
    Delivered { replay: bool },
    /// Invoice not settled yet; nothing changed
    NotPaid,
    /// No registry entry for this payment id
    NotFound,
    /// Another trigger holds the in-flight claim
    Busy,
    /// Provisioning failed; entry released for retry
    Failed,
}

pub struct Orchestrator {
    registry: Arc<InvoiceRegistry>,
    connections: Arc<ConnectionMap>,
    payments: Arc<dyn PaymentApi>,
    oracle: Arc<PriceOracle>,
    vpn: Arc<dyn VpnManager>,
    notifier: Arc<dyn Notifier>,
    prices: PriceTable,
    webhook_url: String,
    bw_limit_mb: i64,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<InvoiceRegistry>,
        connections: Arc<ConnectionMap>,
        payments: Arc<dyn PaymentApi>,
        oracle: Arc<PriceOracle>,
        vpn: Arc<dyn VpnManager>,
        notifier: Arc<dyn Notifier>,
        prices: PriceTable,
        webhook_url: String,
        bw_limit_mb: i64,
    ) -> Self {
        Self {
            registry,
            connections,
            payments,
            oracle,
            vpn,
            notifier,
            prices,
            webhook_url,
            bw_limit_mb,
        }
    }

    /// Validate a request, price it server-side, create the invoice and
    /// register the pending entry.
    ///
    /// Validation and the capacity check run before the payment
    /// collaborator is contacted: a rejected request never leaves an
    /// orphan invoice behind.
    pub async fn open_invoice(
        &self,
        connection_id: ConnectionId,
        params: InvoiceParams,
    ) -> Result<Invoice> {
        let tier = Tier::from_index(params.tier_index)?;
        let public_key = WgKey::parse(params.public_key)?;
        // Rejects unknown regions up front
        self.vpn.dns_name(&params.region)?;

        let (kind, preshared_key, key_id) = if params.is_renew {
            let key_id = params.key_id.ok_or_else(|| {
                StoreError::Validation("keyId is required for renewals".into())
            })?;
            (RequestKind::RenewSubscription, None, Some(key_id))
        } else {
            let raw = params.preshared_key.ok_or_else(|| {
                StoreError::Validation("presharedKey is required for new subscriptions".into())
            })?;
            (RequestKind::NewSubscription, Some(WgKey::parse(raw)?), None)
        };

        if self.registry.at_capacity() {
            return Err(StoreError::Capacity(self.registry.len()));
        }

        let price = self.prices.price_usd(tier);
        let amount_sats = self.oracle.sats_for(price).await?;
        let memo = format!("VPN subscription: {tier}");
        let invoice = self
            .payments
            .create_invoice(amount_sats, &memo, &self.webhook_url)
            .await?;

        self.registry.register(PendingRequest {
            payment_id: invoice.payment_id.clone(),
            connection_id,
            kind,
            public_key,
            preshared_key,
            tier,
            region: params.region,
            key_id,
            amount_sats,
            created_at: Utc::now(),
            invoice_expires_at: invoice.expires_at,
            state: FulfillmentState::Pending,
        })?;

        tracing::info!(
            payment_id = %invoice.payment_id,
            %connection_id,
            amount_sats,
            %tier,
            "invoice opened"
        );
        Ok(invoice)
    }

    /// Client-initiated re-check after a reconnect: re-target delivery at
    /// the calling connection, then run the confirmation flow
    pub async fn check_invoice(&self, connection_id: ConnectionId, payment_id: &str) -> Outcome {
        if !self.registry.rebind_connection(payment_id, connection_id) {
            tracing::warn!(payment_id, %connection_id, "check for unknown invoice");
            self.connections.push(
                connection_id,
                ServerEvent::Error {
                    message: StoreError::NotFound(payment_id.into()).user_message(),
                },
            );
            return Outcome::NotFound;
        }
        self.on_payment_confirmed(payment_id).await
    }

    /// Webhook- or re-check-triggered confirmation flow.
    ///
    /// Safe to run concurrently for the same payment id: the registry
    /// claim resolves the race to exactly one provisioning call.
    pub async fn on_payment_confirmed(&self, payment_id: &str) -> Outcome {
        match self.payments.check_paid(payment_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(payment_id, "invoice not paid yet");
                return Outcome::NotPaid;
            }
            Err(e) => {
                tracing::warn!(payment_id, %e, "payment verification failed");
                return Outcome::Failed;
            }
        }

        match self.registry.claim(payment_id) {
            Claim::NotFound => {
                // Either the process restarted and lost the registry, or
                // someone is probing with forged payment ids
                tracing::error!(payment_id, "paid invoice has no registry entry");
                Outcome::NotFound
            }
            Claim::Busy => {
                tracing::debug!(payment_id, "fulfillment already in flight");
                Outcome::Busy
            }
            Claim::Replay(payload) => {
                if let Some(entry) = self.registry.find(payment_id) {
                    self.connections.push(
                        entry.connection_id,
                        ServerEvent::PaymentConfirmed {
                            payment_id: payment_id.into(),
                        },
                    );
                    self.deliver(&entry, payload);
                }
                Outcome::Delivered { replay: true }
            }
            Claim::Claimed(entry) => {
                self.connections.push(
                    entry.connection_id,
                    ServerEvent::PaymentConfirmed {
                        payment_id: payment_id.into(),
                    },
                );

                match self.provision(&entry).await {
                    Ok(payload) => {
                        if let Err(e) = self.registry.mark_fulfilled(payment_id, payload.clone()) {
                            // Entry purged mid-flight; deliver anyway
                            tracing::warn!(payment_id, %e, "could not cache fulfillment result");
                        }
                        self.notify_success(&entry).await;
                        self.deliver(&entry, payload);
                        Outcome::Delivered { replay: false }
                    }
                    Err(e) => {
                        self.registry.release(payment_id);
                        tracing::error!(payment_id, %e, "provisioning failed");
                        self.notifier
                            .notify(&format!(
                                "Fulfillment failed for payment {payment_id}: {e}"
                            ))
                            .await;
                        self.connections.push(
                            entry.connection_id,
                            ServerEvent::Error {
                                message: e.user_message(),
                            },
                        );
                        Outcome::Failed
                    }
                }
            }
        }
    }

    /// Run the provisioning/renewal call sequence and assemble the payload
    async fn provision(&self, entry: &PendingRequest) -> Result<serde_json::Value> {
        match entry.kind {
            RequestKind::NewSubscription => {
                let expiry = compute_expiry(entry.tier, None, Utc::now());
                let provisioned = self
                    .vpn
                    .create_or_update_peer(
                        &entry.region,
                        &entry.public_key,
                        entry.preshared_key.as_ref(),
                        self.bw_limit_mb,
                        expiry,
                    )
                    .await?;
                let port = self
                    .vpn
                    .allocate_forwarded_port(&entry.region, &provisioned.peer_id)
                    .await?;

                let mut payload = provisioned.raw;
                if let Some(obj) = payload.as_object_mut() {
                    obj.insert("portFwd".into(), json!(port));
                    obj.insert("dnsName".into(), json!(self.vpn.dns_name(&entry.region)?));
                    obj.insert("subExpiry".into(), json!(format_manager_date(expiry)));
                }
                Ok(payload)
            }

            RequestKind::RenewSubscription => {
                let key_id = entry.key_id.as_deref().ok_or_else(|| {
                    StoreError::Validation("renewal entry without keyId".into())
                })?;

                let current = self.vpn.get_subscription(&entry.region, key_id).await?;
                // Extensions stack onto unexpired time, never truncate
                let expiry = compute_expiry(entry.tier, Some(current.expires_at), Utc::now());
                self.vpn
                    .edit_subscription(&entry.region, key_id, expiry)
                    .await?;

                // A peer disabled for non-payment must come back with the
                // renewal. From here on the expiry is already moved, so any
                // failure is a partial one and must surface as an error.
                let record = self
                    .vpn
                    .lookup_peer_by_public_key(&entry.region, &entry.public_key)
                    .await
                    .map_err(|e| {
                        StoreError::PartialFailure(format!(
                            "expiry updated but peer state unknown: {e}"
                        ))
                    })?;
                if let Some(record) = record {
                    if !record.enabled {
                        self.vpn
                            .enable_peer(&entry.region, &record.peer_id)
                            .await
                            .map_err(|e| {
                                StoreError::PartialFailure(format!(
                                    "expiry updated but re-enable failed: {e}"
                                ))
                            })?;
                    }
                }

                Ok(json!({
                    "keyID": key_id,
                    "newExpiry": expiry,
                    "subExpiry": format_manager_date(expiry),
                }))
            }
        }
    }

    /// Push the result to the entry's connection; a gone connection is not
    /// an error, the cached payload replays on the next check
    fn deliver(&self, entry: &PendingRequest, payload: serde_json::Value) {
        // The client may have reconnected and rebound while provisioning
        // was in flight; the registry holds the current target, not the
        // claim-time snapshot
        let target = self
            .registry
            .find(&entry.payment_id)
            .map_or(entry.connection_id, |current| current.connection_id);

        let event = match entry.kind {
            RequestKind::NewSubscription => ServerEvent::ConfigReady {
                peer_config: payload,
            },
            RequestKind::RenewSubscription => ServerEvent::SubscriptionUpdated {
                subscription: payload,
            },
        };
        if !self.connections.push(target, event) {
            tracing::info!(
                payment_id = %entry.payment_id,
                "connection gone; result cached for replay"
            );
        }
    }

    async fn notify_success(&self, entry: &PendingRequest) {
        let dns = self
            .vpn
            .dns_name(&entry.region)
            .unwrap_or_else(|_| entry.region.clone());
        let price = self.prices.price_usd(entry.tier);
        let message = match entry.kind {
            RequestKind::NewSubscription => format!(
                "New subscription: {} for ${price} on {dns} ({} sats)",
                entry.tier, entry.amount_sats
            ),
            RequestKind::RenewSubscription => format!(
                "Renewed subscription: {} for ${price} on {dns} ({} sats)",
                entry.tier, entry.amount_sats
            ),
        };
        self.notifier.notify(&message).await;
    }

    /// Scan every region's manager for a peer with this public key.
    ///
    /// Unauthenticated by design (possession of the key is the identity);
    /// per-region failures are logged and the scan continues.
    pub async fn lookup_key(&self, public_key: &str) -> Result<Option<KeyLookupResult>> {
        let key = WgKey::parse(public_key)?;

        for region in self.vpn.regions() {
            let record = match self.vpn.lookup_peer_by_public_key(&region, &key).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(region, %e, "key lookup failed, scanning on");
                    continue;
                }
            };
            match self.vpn.get_subscription(&region, &record.peer_id).await {
                Ok(sub) => {
                    return Ok(Some(KeyLookupResult {
                        key_id: record.peer_id,
                        subscription_end: sub.expires_at,
                        dns_name: self.vpn.dns_name(&region)?,
                        region,
                    }));
                }
                Err(e) => {
                    tracing::warn!(region, %e, "subscription fetch failed, scanning on");
                }
            }
        }
        Ok(None)
    }
}
