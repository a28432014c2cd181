//! Parsing of relative expiry expressions such as `10m`, `2d` or `never`.

use chrono::{DateTime, TimeDelta, Utc};

/// Expression that explicitly disables expiry.
pub const NEVER: &str = "never";

/// Parse an expiry expression relative to the current time.
///
/// Returns `None` for "no expiry", which includes every malformed expression.
pub fn parse_expiry(expr: Option<&str>) -> Option<DateTime<Utc>> {
    parse_expiry_at(expr, Utc::now())
}

/// Parse an expiry expression relative to `now`.
///
/// The grammar is a non-negative integer directly followed by one unit:
/// `m` minutes, `h` hours, `d` days, `w` weeks, `M` months of 30 days and `y` years of
/// 365 days.
pub fn parse_expiry_at(expr: Option<&str>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let expr = expr?;
    if expr.is_empty() || expr == NEVER {
        return None;
    }
    let unit = expr.chars().last()?;
    let amount = &expr[..expr.len() - unit.len_utf8()];
    if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: i64 = amount.parse().ok()?;
    let seconds = amount.checked_mul(unit_seconds(unit)?)?;
    now.checked_add_signed(TimeDelta::try_seconds(seconds)?)
}

fn unit_seconds(unit: char) -> Option<i64> {
    const MINUTE: i64 = 60;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    let secs = match unit {
        'm' => MINUTE,
        'h' => HOUR,
        'd' => DAY,
        'w' => 7 * DAY,
        'M' => 30 * DAY,
        'y' => 365 * DAY,
        _ => return None,
    };
    Some(secs)
}

/// Whether an expiry timestamp has passed.
pub fn is_expired(expires_at: Option<&DateTime<Utc>>) -> bool {
    is_expired_at(expires_at, Utc::now())
}

/// Whether an expiry timestamp has passed at `now`.
pub fn is_expired_at(expires_at: Option<&DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|at| now > *at)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset(expr: &str) -> Option<i64> {
        let now = Utc::now();
        parse_expiry_at(Some(expr), now).map(|at| (at - now).num_seconds())
    }

    #[test]
    fn units() {
        assert_eq!(offset("10m"), Some(600));
        assert_eq!(offset("1h"), Some(3600));
        assert_eq!(offset("2d"), Some(2 * 86400));
        assert_eq!(offset("1w"), Some(7 * 86400));
        assert_eq!(offset("1M"), Some(30 * 86400));
        assert_eq!(offset("1y"), Some(365 * 86400));
        assert_eq!(offset("0h"), Some(0));
    }

    #[test]
    fn no_expiry() {
        assert_eq!(parse_expiry(None), None);
        for expr in ["", "never", "invalid", "10x", "abc", "h", "-1h", "1.5h", " 1h", "1hh"] {
            assert_eq!(parse_expiry(Some(expr)), None, "{expr:?}");
        }
    }

    #[test]
    fn overflow_is_no_expiry() {
        assert_eq!(parse_expiry(Some("99999999999999999999y")), None);
        assert_eq!(parse_expiry(Some("9223372036854775807y")), None);
    }

    #[test]
    fn expired() {
        let now = Utc::now();
        assert!(!is_expired(None));
        assert!(is_expired_at(Some(&(now - TimeDelta::seconds(1))), now));
        assert!(!is_expired_at(Some(&now), now));
        assert!(!is_expired(parse_expiry(Some("1h")).as_ref()));
    }
}
