//! Lightning Payment Collaborator
//!
//! LNbits-shaped REST client: create an invoice with an embedded expiry and
//! a webhook callback, and check whether an invoice has settled. The
//! webhook is at-least-once; dedup is the registry's job, not ours.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tunnel_core::error::{Result, StoreError};

/// A Lightning invoice as issued by the payment collaborator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Invoice {
    /// Payment hash; the system-wide correlation key
    pub payment_id: String,
    /// BOLT11 payment request string for the browser to render
    pub payment_request: String,
    pub amount_sats: u64,
    /// Expiry embedded in the invoice; drives the registry purge
    pub expires_at: DateTime<Utc>,
}

/// Payment collaborator interface
#[async_trait]
pub trait PaymentApi: Send + Sync {
    /// Create an invoice; the webhook URL is called on settlement
    async fn create_invoice(&self, amount_sats: u64, memo: &str, webhook: &str)
    -> Result<Invoice>;

    /// Check whether an invoice has been paid
    async fn check_paid(&self, payment_id: &str) -> Result<bool>;
}

/// LNbits client configuration
#[derive(Clone, Debug)]
pub struct LnbitsConfig {
    /// Invoice API endpoint, e.g. `https://lnbits.example/api/v1/payments`
    pub url: String,
    pub api_key: String,
    /// Expiry requested for new invoices, seconds
    pub invoice_expiry_secs: i64,
}

impl LnbitsConfig {
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("LNBITS_URL")
            .map_err(|_| StoreError::Config("LNBITS_URL not set".into()))?;
        let api_key = std::env::var("LNBITS_API_KEY")
            .map_err(|_| StoreError::Config("LNBITS_API_KEY not set".into()))?;
        let invoice_expiry_secs = std::env::var("INVOICE_EXPIRY_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600);

        Ok(Self {
            url,
            api_key,
            invoice_expiry_secs,
        })
    }
}

/// LNbits payment API client
pub struct LnbitsClient {
    http: reqwest::Client,
    config: LnbitsConfig,
}

impl LnbitsClient {
    pub fn new(config: LnbitsConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(LnbitsConfig::from_env()?))
    }
}

#[derive(Serialize)]
struct CreateInvoiceRequest<'a> {
    out: bool,
    amount: u64,
    memo: &'a str,
    webhook: &'a str,
    expiry: i64,
}

#[derive(Deserialize)]
struct CreateInvoiceResponse {
    payment_hash: String,
    payment_request: String,
}

#[derive(Deserialize)]
struct PaymentStatusResponse {
    paid: bool,
}

#[async_trait]
impl PaymentApi for LnbitsClient {
    async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
        webhook: &str,
    ) -> Result<Invoice> {
        let body = CreateInvoiceRequest {
            out: false,
            amount: amount_sats,
            memo,
            webhook,
            expiry: self.config.invoice_expiry_secs,
        };

        let response = self
            .http
            .post(&self.config.url)
            .header("X-Api-Key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Upstream(format!("lnbits create invoice: {e}")))?
            .error_for_status()
            .map_err(|e| StoreError::Upstream(format!("lnbits create invoice: {e}")))?
            .json::<CreateInvoiceResponse>()
            .await
            .map_err(|e| StoreError::Upstream(format!("lnbits invoice response: {e}")))?;

        // We requested the expiry, so it matches the one embedded in the
        // BOLT11 invoice without decoding it
        let expires_at = Utc::now() + Duration::seconds(self.config.invoice_expiry_secs);

        tracing::info!(
            payment_id = %response.payment_hash,
            amount_sats,
            "created invoice"
        );

        Ok(Invoice {
            payment_id: response.payment_hash,
            payment_request: response.payment_request,
            amount_sats,
            expires_at,
        })
    }

    async fn check_paid(&self, payment_id: &str) -> Result<bool> {
        let status = self
            .http
            .get(format!("{}/{}", self.config.url, payment_id))
            .header("X-Api-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| StoreError::Upstream(format!("lnbits check invoice: {e}")))?
            .error_for_status()
            .map_err(|e| StoreError::Upstream(format!("lnbits check invoice: {e}")))?
            .json::<PaymentStatusResponse>()
            .await
            .map_err(|e| StoreError::Upstream(format!("lnbits status response: {e}")))?;

        Ok(status.paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_shape() {
        let body = CreateInvoiceRequest {
            out: false,
            amount: 21_000,
            memo: "VPN subscription: 3 months",
            webhook: "https://store.example/hooks/invoice",
            expiry: 600,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["out"], false);
        assert_eq!(json["amount"], 21_000);
        assert_eq!(json["expiry"], 600);
    }

    #[test]
    fn test_status_response_parses() {
        let status: PaymentStatusResponse =
            serde_json::from_str(r#"{"paid": true, "preimage": "ab"}"#).unwrap();
        assert!(status.paid);
    }
}
