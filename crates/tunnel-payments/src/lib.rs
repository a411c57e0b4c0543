//! # tunnel-payments
//!
//! Lightning payment collaborator client and price oracle.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐  createInvoice   ┌──────────────┐   webhook POST
//! │   server    │─────────────────▶│    LNbits    │──────────────────▶
//! │             │◀─────────────────│              │   {payment_hash}
//! └─────────────┘  bolt11 invoice  └──────────────┘
//! ```
//!
//! The invoice carries its own expiry (we request it at creation), which
//! the server uses to purge stale registry entries. Satoshi amounts are
//! always derived server-side: fiat tier price × live exchange rate, with
//! rate failures propagated rather than defaulted.

mod lnbits;
mod rates;

pub use lnbits::{Invoice, LnbitsClient, LnbitsConfig, PaymentApi};
pub use rates::{HttpRateSource, PriceOracle, RateSource};
