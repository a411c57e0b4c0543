//! VPN-Manager Client
//!
//! HTTP client for the WireGuard manager API that runs on every VPN node.
//! Provisioning is create-or-update by public key on the manager side,
//! which is what makes the orchestrator's retry-on-failure safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tunnel_core::error::{Result, StoreError};
use tunnel_core::{WgKey, format_manager_date, parse_manager_date};

use crate::region::{ManagerEndpoint, RegionMap};

/// Result of creating or updating a peer
#[derive(Clone, Debug)]
pub struct PeerProvisioned {
    pub peer_id: String,
    /// Full manager response (assigned address, listen port, server public
    /// key, allowed IPs); forwarded to the client as the peer config
    pub raw: Value,
}

/// Subscription state of an existing peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub expires_at: DateTime<Utc>,
    pub enabled: bool,
}

/// Peer record found by public-key lookup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: String,
    pub enabled: bool,
}

/// VPN-manager collaborator interface, region-scoped
#[async_trait]
pub trait VpnManager: Send + Sync {
    /// Create-or-update a peer by public key; idempotent on the manager side
    async fn create_or_update_peer(
        &self,
        region: &str,
        public_key: &WgKey,
        preshared_key: Option<&WgKey>,
        bw_limit_mb: i64,
        expiry: DateTime<Utc>,
    ) -> Result<PeerProvisioned>;

    /// Allocate the forwarded port for a freshly created peer
    async fn allocate_forwarded_port(&self, region: &str, peer_id: &str) -> Result<u16>;

    async fn get_subscription(&self, region: &str, peer_id: &str) -> Result<SubscriptionInfo>;

    /// Move the subscription expiry; bandwidth settings stay untouched
    async fn edit_subscription(
        &self,
        region: &str,
        peer_id: &str,
        expiry: DateTime<Utc>,
    ) -> Result<()>;

    /// Re-enable a peer that was administratively disabled
    async fn enable_peer(&self, region: &str, peer_id: &str) -> Result<()>;

    async fn lookup_peer_by_public_key(
        &self,
        region: &str,
        public_key: &WgKey,
    ) -> Result<Option<PeerRecord>>;

    /// Region codes in lookup-scan order
    fn regions(&self) -> Vec<String>;

    /// Host name of a region's VPN node
    fn dns_name(&self, region: &str) -> Result<String>;
}

/// HTTP implementation over the per-region endpoint table
pub struct HttpVpnManager {
    http: reqwest::Client,
    regions: RegionMap,
}

impl HttpVpnManager {
    pub fn new(regions: RegionMap) -> Self {
        Self {
            http: reqwest::Client::new(),
            regions,
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(RegionMap::from_env()?))
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        endpoint: &ManagerEndpoint,
        path: &str,
        body: &B,
    ) -> Result<Value> {
        let url = format!("{}{}", endpoint.base_url, path);
        self.http
            .post(&url)
            .header("Authorization", &endpoint.auth_token)
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Upstream(format!("wg manager {path}: {e}")))?
            .error_for_status()
            .map_err(|e| StoreError::Upstream(format!("wg manager {path}: {e}")))?
            .json::<Value>()
            .await
            .map_err(|e| StoreError::Upstream(format!("wg manager {path} response: {e}")))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePeerRequest<'a> {
    public_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    preshared_key: Option<&'a str>,
    bw_limit: i64,
    sub_expiry: String,
    ip_index: u8,
}

#[derive(Serialize)]
struct PeerIdRequest<'a> {
    // The manager spells it keyID, not keyId
    #[serde(rename = "keyID")]
    key_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EditSubscriptionRequest<'a> {
    #[serde(rename = "keyID")]
    key_id: &'a str,
    bw_limit: i64,
    sub_expiry: String,
    bw_reset: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortFwdResponse {
    port_fwd: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionResponse {
    subscription_end: String,
    #[serde(rename = "Enabled")]
    enabled: Option<String>,
}

#[derive(Deserialize)]
struct KeyListResponse {
    #[serde(rename = "Keys")]
    keys: Option<Vec<KeyEntry>>,
}

#[derive(Deserialize)]
struct KeyEntry {
    #[serde(rename = "KeyID")]
    key_id: Value,
    #[serde(rename = "PublicKey")]
    public_key: String,
    #[serde(rename = "Enabled")]
    enabled: Option<String>,
}

/// Manager ids come back as either strings or numbers
fn id_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(StoreError::Upstream(format!(
            "unexpected key id shape: {other}"
        ))),
    }
}

/// The manager reports Enabled as the string "true"/"false"
fn is_enabled(raw: Option<&str>) -> bool {
    !matches!(raw, Some("false"))
}

#[async_trait]
impl VpnManager for HttpVpnManager {
    async fn create_or_update_peer(
        &self,
        region: &str,
        public_key: &WgKey,
        preshared_key: Option<&WgKey>,
        bw_limit_mb: i64,
        expiry: DateTime<Utc>,
    ) -> Result<PeerProvisioned> {
        let endpoint = self.regions.get(region)?;
        let body = CreatePeerRequest {
            public_key: public_key.as_str(),
            preshared_key: preshared_key.map(WgKey::as_str),
            bw_limit: bw_limit_mb,
            sub_expiry: format_manager_date(expiry),
            ip_index: 0,
        };

        let raw = self.post_json(endpoint, "key", &body).await?;
        let peer_id = raw
            .get("keyID")
            .ok_or_else(|| StoreError::Upstream("create peer response missing keyID".into()))
            .and_then(id_string)?;

        tracing::info!(region, peer_id, "created wg peer entry");
        Ok(PeerProvisioned { peer_id, raw })
    }

    async fn allocate_forwarded_port(&self, region: &str, peer_id: &str) -> Result<u16> {
        let endpoint = self.regions.get(region)?;
        let raw = self
            .post_json(endpoint, "portFwd", &PeerIdRequest { key_id: peer_id })
            .await?;
        let parsed: PortFwdResponse = serde_json::from_value(raw)
            .map_err(|e| StoreError::Upstream(format!("portFwd response: {e}")))?;
        Ok(parsed.port_fwd)
    }

    async fn get_subscription(&self, region: &str, peer_id: &str) -> Result<SubscriptionInfo> {
        let endpoint = self.regions.get(region)?;
        let raw = self
            .post_json(endpoint, "subscription", &PeerIdRequest { key_id: peer_id })
            .await?;
        let parsed: SubscriptionResponse = serde_json::from_value(raw)
            .map_err(|e| StoreError::Upstream(format!("subscription response: {e}")))?;

        Ok(SubscriptionInfo {
            expires_at: parse_manager_date(&parsed.subscription_end)?,
            enabled: is_enabled(parsed.enabled.as_deref()),
        })
    }

    async fn edit_subscription(
        &self,
        region: &str,
        peer_id: &str,
        expiry: DateTime<Utc>,
    ) -> Result<()> {
        let endpoint = self.regions.get(region)?;
        let body = EditSubscriptionRequest {
            key_id: peer_id,
            // -1 leaves the bandwidth limit untouched
            bw_limit: -1,
            sub_expiry: format_manager_date(expiry),
            bw_reset: false,
        };
        self.post_json(endpoint, "subscription/edit", &body).await?;
        tracing::info!(region, peer_id, "updated subscription expiry");
        Ok(())
    }

    async fn enable_peer(&self, region: &str, peer_id: &str) -> Result<()> {
        let endpoint = self.regions.get(region)?;
        self.post_json(endpoint, "key/enable", &PeerIdRequest { key_id: peer_id })
            .await?;
        tracing::info!(region, peer_id, "re-enabled wg peer");
        Ok(())
    }

    async fn lookup_peer_by_public_key(
        &self,
        region: &str,
        public_key: &WgKey,
    ) -> Result<Option<PeerRecord>> {
        let endpoint = self.regions.get(region)?;
        let url = format!("{}key", endpoint.base_url);
        let parsed = self
            .http
            .get(&url)
            .header("Authorization", &endpoint.auth_token)
            .send()
            .await
            .map_err(|e| StoreError::Upstream(format!("wg manager key list: {e}")))?
            .error_for_status()
            .map_err(|e| StoreError::Upstream(format!("wg manager key list: {e}")))?
            .json::<KeyListResponse>()
            .await
            .map_err(|e| StoreError::Upstream(format!("key list response: {e}")))?;

        let Some(keys) = parsed.keys else {
            return Ok(None);
        };
        for entry in keys {
            if entry.public_key == public_key.as_str() {
                return Ok(Some(PeerRecord {
                    peer_id: id_string(&entry.key_id)?,
                    enabled: is_enabled(entry.enabled.as_deref()),
                }));
            }
        }
        Ok(None)
    }

    fn regions(&self) -> Vec<String> {
        self.regions.regions()
    }

    fn dns_name(&self, region: &str) -> Result<String> {
        Ok(self.regions.get(region)?.dns_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_shape() {
        let key = WgKey::parse("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=").unwrap();
        let body = CreatePeerRequest {
            public_key: key.as_str(),
            preshared_key: None,
            bw_limit: 100_000,
            sub_expiry: "2024-Sep-15 12:00:00 PM".into(),
            ip_index: 0,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["publicKey"], key.as_str());
        assert_eq!(json["bwLimit"], 100_000);
        assert_eq!(json["ipIndex"], 0);
        assert!(json.get("presharedKey").is_none());
    }

    #[test]
    fn test_peer_id_request_field_name() {
        let json = serde_json::to_value(&PeerIdRequest { key_id: "7" }).unwrap();
        assert_eq!(json, serde_json::json!({"keyID": "7"}));
    }

    #[test]
    fn test_edit_request_shape() {
        let body = EditSubscriptionRequest {
            key_id: "7",
            bw_limit: -1,
            sub_expiry: "2024-Sep-15 12:00:00 PM".into(),
            bw_reset: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["keyID"], "7");
        assert!(json.get("keyId").is_none());
        assert_eq!(json["bwLimit"], -1);
        assert_eq!(json["bwReset"], false);
        assert_eq!(json["subExpiry"], "2024-Sep-15 12:00:00 PM");
    }

    #[test]
    fn test_subscription_response_parses() {
        let parsed: SubscriptionResponse = serde_json::from_str(
            r#"{"subscriptionEnd": "2024-Sep-15 12:00:00 PM", "Enabled": "false"}"#,
        )
        .unwrap();
        assert_eq!(parsed.subscription_end, "2024-Sep-15 12:00:00 PM");
        assert!(!is_enabled(parsed.enabled.as_deref()));
    }

    #[test]
    fn test_enabled_defaults_true_when_absent() {
        assert!(is_enabled(None));
        assert!(is_enabled(Some("true")));
        assert!(!is_enabled(Some("false")));
    }

    #[test]
    fn test_id_string_accepts_numbers() {
        assert_eq!(id_string(&serde_json::json!(42)).unwrap(), "42");
        assert_eq!(id_string(&serde_json::json!("42")).unwrap(), "42");
        assert!(id_string(&serde_json::json!(null)).is_err());
    }
}
