//! WireGuard Key Validation
//!
//! Keys are client-supplied and only checked for shape: 44 characters of
//! standard base64 decoding to exactly 32 bytes. Possession of the key is
//! the only identity in this system.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A validated WireGuard key (public or preshared), base64 form
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WgKey(String);

impl WgKey {
    /// Validate a client-supplied key string
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.len() != 44 {
            return Err(StoreError::Validation(format!(
                "WireGuard key must be 44 characters, got {}",
                raw.len()
            )));
        }
        let decoded = STANDARD
            .decode(&raw)
            .map_err(|_| StoreError::Validation("WireGuard key is not valid base64".into()))?;
        if decoded.len() != 32 {
            return Err(StoreError::Validation(
                "WireGuard key must decode to 32 bytes".into(),
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WgKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WgKey {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<WgKey> for String {
    fn from(key: WgKey) -> Self {
        key.0
    }
}
