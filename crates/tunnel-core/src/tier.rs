//! Subscription Tiers
//!
//! Fixed set of subscription durations, each bound to a fiat price.
//! The browser only ever sends a tier *index*; prices are always derived
//! server-side from this table.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Subscription duration tiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    OneMonth,
    ThreeMonths,
    SixMonths,
    TwelveMonths,
}

impl Tier {
    /// All tiers, in index order
    pub const ALL: [Tier; 4] = [
        Tier::OneMonth,
        Tier::ThreeMonths,
        Tier::SixMonths,
        Tier::TwelveMonths,
    ];

    /// Resolve a client-sent selection index
    pub fn from_index(index: u8) -> Result<Self> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| StoreError::Validation(format!("tier index {index} out of range")))
    }

    /// Calendar months added by this tier
    pub fn months(self) -> u32 {
        match self {
            Tier::OneMonth => 1,
            Tier::ThreeMonths => 3,
            Tier::SixMonths => 6,
            Tier::TwelveMonths => 12,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::OneMonth => "1 month",
            Tier::ThreeMonths => "3 months",
            Tier::SixMonths => "6 months",
            Tier::TwelveMonths => "12 months",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fiat price per tier (USD)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceTable {
    one_month: Decimal,
    three_months: Decimal,
    six_months: Decimal,
    twelve_months: Decimal,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            one_month: dec!(3.00),
            three_months: dec!(8.50),
            six_months: dec!(16.00),
            twelve_months: dec!(28.50),
        }
    }
}

impl PriceTable {
    /// Read overrides from `PRICE_ONE_MONTH` .. `PRICE_ONE_YEAR` env vars
    pub fn from_env() -> Result<Self> {
        let mut table = Self::default();
        for (var, slot) in [
            ("PRICE_ONE_MONTH", &mut table.one_month),
            ("PRICE_THREE_MONTHS", &mut table.three_months),
            ("PRICE_SIX_MONTHS", &mut table.six_months),
            ("PRICE_ONE_YEAR", &mut table.twelve_months),
        ] {
            if let Ok(raw) = std::env::var(var) {
                *slot = raw
                    .parse()
                    .map_err(|_| StoreError::Config(format!("{var}: invalid price '{raw}'")))?;
            }
        }
        Ok(table)
    }

    /// Server-side price for a tier, in USD
    pub fn price_usd(&self, tier: Tier) -> Decimal {
        match tier {
            Tier::OneMonth => self.one_month,
            Tier::ThreeMonths => self.three_months,
            Tier::SixMonths => self.six_months,
            Tier::TwelveMonths => self.twelve_months,
        }
    }
}
