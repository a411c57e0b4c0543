//! Server Configuration
//!
//! Everything comes from environment variables (plus `.env` via dotenvy in
//! `main`), parsed once at startup. Collaborator-specific settings live
//! with their clients (`LnbitsConfig`, `RegionMap`); this struct covers
//! the server itself.

use tunnel_core::PriceTable;
use tunnel_core::error::{Result, StoreError};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Route the payment collaborator POSTs settlements to
    pub webhook_path: String,
    /// Absolute URL of that route, handed to the collaborator per invoice
    pub webhook_url: String,
    /// InvoiceRegistry cap; registrations beyond it are rejected
    pub max_pending_invoices: usize,
    pub purge_interval_secs: u64,
    /// Bandwidth limit handed to the VPN manager per new peer, MB
    pub bw_limit_mb: i64,
    pub static_dir: String,
    pub prices: PriceTable,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".into());
        let webhook_path =
            std::env::var("WEBHOOK_PATH").unwrap_or_else(|_| "/hooks/invoice".into());
        if !webhook_path.starts_with('/') {
            return Err(StoreError::Config(format!(
                "WEBHOOK_PATH must start with '/': {webhook_path}"
            )));
        }

        let public_url = std::env::var("PUBLIC_URL")
            .map_err(|_| StoreError::Config("PUBLIC_URL not set".into()))?;
        let webhook_url = format!("{}{}", public_url.trim_end_matches('/'), webhook_path);

        let max_pending_invoices = env_parse("MAX_PENDING_INVOICES", 100)?;
        let purge_interval_secs = env_parse("PURGE_INTERVAL_SECS", 600)?;
        let bw_limit_mb = env_parse("BW_LIMIT_MB", 100_000)?;
        let static_dir = std::env::var("STATIC_DIR").unwrap_or_else(|_| "static".into());

        Ok(Self {
            bind_addr,
            webhook_path,
            webhook_url,
            max_pending_invoices,
            purge_interval_secs,
            bw_limit_mb,
            static_dir,
            prices: PriceTable::from_env()?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> Result<T> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| StoreError::Config(format!("{var}: invalid value '{raw}'"))),
    }
}
