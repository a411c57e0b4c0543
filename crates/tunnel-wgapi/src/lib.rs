//! # tunnel-wgapi
//!
//! Client for the WireGuard manager API running on each VPN node, one
//! endpoint per region. The `VpnManager` trait is the seam the
//! orchestrator provisions through; tests swap in mocks, production uses
//! `HttpVpnManager` over the env-configured region table.

mod manager;
mod region;

pub use manager::{HttpVpnManager, PeerProvisioned, PeerRecord, SubscriptionInfo, VpnManager};
pub use region::{ManagerEndpoint, RegionMap};
