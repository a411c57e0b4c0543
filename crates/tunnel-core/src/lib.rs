//! # tunnel-core
//!
//! Core domain logic for the Lightning-paid WireGuard subscription store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     InvoiceRegistry                          │
//! │  payment_id ──▶ PendingRequest { connection, tier, keys,     │
//! │                                  Pending|InFlight|Fulfilled }│
//! └──────────────────────────────────────────────────────────────┘
//!         ▲ register / claim / mark_fulfilled / purge_expired
//! ```
//!
//! The registry is the only shared mutable state in the system: a bounded,
//! time-purged table that correlates asynchronously-arriving payment
//! confirmations with the browser connection that requested the invoice.
//! Everything here is transport-agnostic; the server crate wires it to
//! WebSockets and webhooks.

pub mod error;
pub mod expiry;
pub mod keys;
pub mod registry;
pub mod tier;

pub use error::{Result, StoreError};
pub use expiry::{compute_expiry, format_manager_date, parse_manager_date};
pub use keys::WgKey;
pub use registry::{
    Claim, ConnectionId, FulfillmentState, InvoiceRegistry, PendingRequest, RequestKind,
};
pub use tier::{PriceTable, Tier};
