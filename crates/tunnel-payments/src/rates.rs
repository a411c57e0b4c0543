//! Price Oracle
//!
//! Converts the server-side fiat price table to a satoshi amount using a
//! live exchange rate. Rate-fetch failures propagate: billing must never
//! silently fall back to a stale or default rate.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::Deserialize;

use tunnel_core::error::{Result, StoreError};

const SATS_PER_BTC: Decimal = dec!(100_000_000);

/// Exchange-rate source interface (fiat per BTC)
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn get_rate(&self) -> Result<Decimal>;
}

/// HTTP rate source hitting a `{"USD":{"buy": n}}`-shaped price API
pub struct HttpRateSource {
    http: reqwest::Client,
    url: String,
}

impl HttpRateSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let url = std::env::var("PRICE_API_URL")
            .map_err(|_| StoreError::Config("PRICE_API_URL not set".into()))?;
        Ok(Self::new(url))
    }
}

#[derive(Deserialize)]
struct RateResponse {
    #[serde(rename = "USD")]
    usd: UsdQuote,
}

#[derive(Deserialize)]
struct UsdQuote {
    buy: f64,
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn get_rate(&self) -> Result<Decimal> {
        let quote = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| StoreError::Upstream(format!("rate fetch: {e}")))?
            .error_for_status()
            .map_err(|e| StoreError::Upstream(format!("rate fetch: {e}")))?
            .json::<RateResponse>()
            .await
            .map_err(|e| StoreError::Upstream(format!("rate response: {e}")))?;

        Decimal::try_from(quote.usd.buy)
            .map_err(|e| StoreError::Upstream(format!("rate not representable: {e}")))
    }
}

/// Fiat-to-satoshi conversion on top of a rate source
pub struct PriceOracle {
    source: Arc<dyn RateSource>,
}

impl PriceOracle {
    pub fn new(source: Arc<dyn RateSource>) -> Self {
        Self { source }
    }

    /// Satoshis per one fiat unit at the current rate
    pub async fn sats_per_unit(&self) -> Result<Decimal> {
        let rate = self.source.get_rate().await?;
        if rate <= Decimal::ZERO {
            return Err(StoreError::Upstream(format!(
                "non-positive exchange rate: {rate}"
            )));
        }
        Ok(SATS_PER_BTC / rate)
    }

    /// Satoshi amount for a fiat price, rounded to the nearest sat
    pub async fn sats_for(&self, price_usd: Decimal) -> Result<u64> {
        let amount = (price_usd * self.sats_per_unit().await?).round();
        amount
            .to_u64()
            .ok_or_else(|| StoreError::Upstream(format!("sat amount out of range: {amount}")))
    }
}
