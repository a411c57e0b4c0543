//! Region Table
//!
//! One VPN-manager endpoint per region, configured from environment:
//! `REGIONS=eu,na,as` plus `VPN_API_EU=https://de2.example.com/manager/`
//! and `VPN_AUTH_EU=...` per region (`VPN_AUTH` as shared fallback).

use tunnel_core::error::{Result, StoreError};

/// A single VPN-manager endpoint
#[derive(Clone, Debug)]
pub struct ManagerEndpoint {
    /// Opaque region code clients select by, e.g. `eu`
    pub region: String,
    /// Base URL including the manager path, trailing slash
    pub base_url: String,
    /// Value for the Authorization header
    pub auth_token: String,
    /// Host name stitched into peer configs, derived from the base URL
    pub dns_name: String,
}

impl ManagerEndpoint {
    pub fn new(
        region: impl Into<String>,
        base_url: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let dns_name = dns_name_of(&base_url);
        Self {
            region: region.into(),
            base_url,
            auth_token: auth_token.into(),
            dns_name,
        }
    }
}

/// `https://de2.example.com/manager/` -> `de2.example.com`
fn dns_name_of(base_url: &str) -> String {
    let stripped = base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    stripped
        .trim_end_matches('/')
        .trim_end_matches("/manager")
        .trim_end_matches('/')
        .to_string()
}

/// Ordered region -> endpoint table
#[derive(Clone, Debug, Default)]
pub struct RegionMap {
    endpoints: Vec<ManagerEndpoint>,
}

impl RegionMap {
    pub fn new(endpoints: Vec<ManagerEndpoint>) -> Self {
        Self { endpoints }
    }

    pub fn from_env() -> Result<Self> {
        let regions = std::env::var("REGIONS")
            .map_err(|_| StoreError::Config("REGIONS not set".into()))?;
        let shared_auth = std::env::var("VPN_AUTH").ok();

        let mut endpoints = Vec::new();
        for region in regions.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            let upper = region.to_uppercase();
            let base_url = std::env::var(format!("VPN_API_{upper}"))
                .map_err(|_| StoreError::Config(format!("VPN_API_{upper} not set")))?;
            let auth = std::env::var(format!("VPN_AUTH_{upper}"))
                .ok()
                .or_else(|| shared_auth.clone())
                .ok_or_else(|| {
                    StoreError::Config(format!("neither VPN_AUTH_{upper} nor VPN_AUTH set"))
                })?;
            endpoints.push(ManagerEndpoint::new(region, base_url, auth));
        }

        if endpoints.is_empty() {
            return Err(StoreError::Config("REGIONS resolved to no endpoints".into()));
        }
        Ok(Self::new(endpoints))
    }

    pub fn get(&self, region: &str) -> Result<&ManagerEndpoint> {
        self.endpoints
            .iter()
            .find(|e| e.region == region)
            .ok_or_else(|| StoreError::UnknownRegion(region.to_string()))
    }

    /// Region codes in configuration order (key-lookup scans this order)
    pub fn regions(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.region.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_name_derivation() {
        let ep = ManagerEndpoint::new("eu", "https://de2.example.com/manager/", "secret");
        assert_eq!(ep.dns_name, "de2.example.com");
        assert_eq!(ep.base_url, "https://de2.example.com/manager/");

        let ep = ManagerEndpoint::new("na", "http://us1.example.com/manager", "secret");
        assert_eq!(ep.dns_name, "us1.example.com");
        assert_eq!(ep.base_url, "http://us1.example.com/manager/");
    }

    #[test]
    fn test_unknown_region() {
        let map = RegionMap::new(vec![ManagerEndpoint::new(
            "eu",
            "https://de2.example.com/manager/",
            "secret",
        )]);
        assert!(map.get("eu").is_ok());
        assert!(matches!(
            map.get("mars"),
            Err(StoreError::UnknownRegion(_))
        ));
    }
}
