//! Subscription Expiry Math
//!
//! Calendar-month arithmetic in UTC with end-of-month clamping. Adding a
//! month to Jan 31 lands on Feb 28/29, never Mar 2. Naive day-count
//! addition would drift a day around DST boundaries in local time, so all
//! math stays on `DateTime<Utc>`.

use chrono::{DateTime, Months, NaiveDateTime, Utc};

use crate::error::{Result, StoreError};
use crate::tier::Tier;

/// Wire format the VPN manager expects, e.g. `2024-Feb-29 06:30:00 PM`
const MANAGER_DATE_FORMAT: &str = "%Y-%b-%d %I:%M:%S %p";

/// Compute the new subscription expiry for a tier.
///
/// Base instant is `now` unless `prior` is supplied and still in the
/// future: renewals stack onto unexpired time, never truncate it.
pub fn compute_expiry(
    tier: Tier,
    prior: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let base = match prior {
        Some(prior) if prior > now => prior,
        _ => now,
    };
    add_months_utc(base, tier.months())
}

/// Add calendar months with day-of-month clamping
fn add_months_utc(base: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    // chrono clamps the day to the last valid day of the target month;
    // overflow is only possible near year 262143
    base.checked_add_months(Months::new(months))
        .unwrap_or(base)
}

/// Format a timestamp for the VPN manager API
pub fn format_manager_date(date: DateTime<Utc>) -> String {
    date.format(MANAGER_DATE_FORMAT).to_string()
}

/// Parse a subscription-end timestamp coming back from the VPN manager
pub fn parse_manager_date(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), MANAGER_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Upstream(format!("unparseable manager date '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_month_end_clamps_in_leap_year() {
        let base = utc("2024-01-31T00:00:00Z");
        assert_eq!(
            compute_expiry(Tier::OneMonth, Some(base), utc("2024-01-01T00:00:00Z")),
            utc("2024-02-29T00:00:00Z")
        );
    }

    #[test]
    fn test_month_end_clamps_in_common_year() {
        let base = utc("2023-01-31T00:00:00Z");
        assert_eq!(
            compute_expiry(Tier::OneMonth, Some(base), utc("2023-01-01T00:00:00Z")),
            utc("2023-02-28T00:00:00Z")
        );
    }

    #[test]
    fn test_new_subscription_starts_from_now() {
        let now = utc("2024-06-15T12:00:00Z");
        assert_eq!(
            compute_expiry(Tier::ThreeMonths, None, now),
            utc("2024-09-15T12:00:00Z")
        );
    }

    #[test]
    fn test_renewal_extends_future_expiry() {
        let now = utc("2024-06-15T12:00:00Z");
        let prior = utc("2024-08-01T00:00:00Z");
        // Extension stacks onto the unexpired time
        assert_eq!(
            compute_expiry(Tier::OneMonth, Some(prior), now),
            utc("2024-09-01T00:00:00Z")
        );
    }

    #[test]
    fn test_lapsed_expiry_falls_back_to_now() {
        let now = utc("2024-06-15T12:00:00Z");
        let prior = utc("2024-01-01T00:00:00Z");
        assert_eq!(
            compute_expiry(Tier::TwelveMonths, Some(prior), now),
            utc("2025-06-15T12:00:00Z")
        );
    }

    #[test]
    fn test_renewal_never_shortens() {
        let now = utc("2024-06-15T12:00:00Z");
        let prior = utc("2024-12-31T23:59:59Z");
        let result = compute_expiry(Tier::OneMonth, Some(prior), now);
        assert!(result >= prior);
    }

    #[test]
    fn test_manager_date_round_trip() {
        let date = utc("2024-02-29T18:30:00Z");
        let formatted = format_manager_date(date);
        assert_eq!(formatted, "2024-Feb-29 06:30:00 PM");
        assert_eq!(parse_manager_date(&formatted).unwrap(), date);
    }

    #[test]
    fn test_garbage_manager_date_is_upstream_error() {
        assert!(matches!(
            parse_manager_date("not a date"),
            Err(StoreError::Upstream(_))
        ));
    }
}
