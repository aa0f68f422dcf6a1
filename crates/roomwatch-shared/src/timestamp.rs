//! Sortable encoding of the host's `DD/MM HH:MM[:SS]` timestamps.
//!
//! The host timestamps carry no year, so ordering is only meaningful within
//! a rolling window; that matches how they are used (comparing a fresh
//! message against a watermark set earlier in the same session).

use chrono::Local;

/// Parse a `DD/MM HH:MM[:SS]` timestamp into a sortable integer:
/// `month * 1_000_000 + day * 10_000 + hour * 100 + minute`.
///
/// Unparsable input yields 0, which sorts before every valid timestamp.
/// Note this conflates "unparsable" with the epoch of the encoding, so a
/// malformed stamp orders as infinitely old rather than erroring.
pub fn orderable(ts: &str) -> u32 {
    let ts = ts.trim();

    let (date_part, time_part) = match ts.split_once(' ') {
        Some(parts) => parts,
        None => return 0,
    };

    let (day, month) = match date_part.split_once('/') {
        Some((d, m)) => match (d.parse::<u32>(), m.parse::<u32>()) {
            (Ok(d), Ok(m)) => (d, m),
            _ => return 0,
        },
        None => return 0,
    };

    // Seconds are accepted but do not contribute to the ordering.
    let mut time_fields = time_part.split(':');
    let (hour, minute) = match (time_fields.next(), time_fields.next()) {
        (Some(h), Some(m)) => match (h.parse::<u32>(), m.parse::<u32>()) {
            (Ok(h), Ok(m)) => (h, m),
            _ => return 0,
        },
        _ => return 0,
    };

    if day == 0 || day > 31 || month == 0 || month > 12 || hour > 23 || minute > 59 {
        return 0;
    }

    month * 1_000_000 + day * 10_000 + hour * 100 + minute
}

/// Current local time rendered in the host's `DD/MM HH:MM` form.
pub fn now_stamp() -> String {
    Local::now().format("%d/%m %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_without_seconds() {
        assert_eq!(orderable("09/03 17:45"), 3 * 1_000_000 + 9 * 10_000 + 17 * 100 + 45);
    }

    #[test]
    fn seconds_are_ignored_for_ordering() {
        assert_eq!(orderable("09/03 17:45:59"), orderable("09/03 17:45"));
    }

    #[test]
    fn later_stamps_order_higher() {
        assert!(orderable("01/02 00:00") > orderable("31/01 23:59"));
        assert!(orderable("15/06 12:30") > orderable("15/06 12:29"));
    }

    #[test]
    fn garbage_orders_as_zero() {
        assert_eq!(orderable(""), 0);
        assert_eq!(orderable("yesterday"), 0);
        assert_eq!(orderable("99/99 99:99"), 0);
        assert_eq!(orderable("12/05"), 0);
        assert!(orderable("01/01 00:00") > orderable("garbage"));
    }

    #[test]
    fn now_stamp_is_parseable() {
        assert!(orderable(&now_stamp()) > 0);
    }
}
