//! Literal-form scanners
//!
//! Once the token locator has classified a byte range, these routines
//! parse the payload: numbers with tick separators, decimals with comma
//! or period points, times, dates with named months, pairs, tuples,
//! money, and the three binary bases. Each returns `None` on malformed
//! input; the caller turns that into a syntax error with the range.

use base64::Engine;
use reval_core::cell::MAX_TUPLE;

const MONTH_NAMES: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

/// `123`, `+123`, `-123`, `1'200'300`.
pub fn scan_integer(bytes: &[u8]) -> Option<i64> {
    let mut at = 0;
    let mut negative = false;
    match bytes.first()? {
        b'+' => at = 1,
        b'-' => {
            negative = true;
            at = 1;
        }
        _ => {}
    }
    let mut value: i64 = 0;
    let mut digits = 0;
    while at < bytes.len() {
        match bytes[at] {
            b'0'..=b'9' => {
                value = value
                    .checked_mul(10)?
                    .checked_add((bytes[at] - b'0') as i64)?;
                digits += 1;
            }
            b'\'' => {} // tick separator
            _ => return None,
        }
        at += 1;
    }
    if digits == 0 {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// `12.3`, `1,5`, `+1.2e-4`, `10%` (trailing percent stripped). Commas
/// serve as decimal points in the European style.
pub fn scan_decimal(bytes: &[u8]) -> Option<f64> {
    let mut text = String::with_capacity(bytes.len());
    let mut body = bytes;
    if body.last() == Some(&b'%') {
        body = &body[..body.len() - 1];
    }
    let mut seen_point = false;
    let mut seen_digit = false;
    for (i, &b) in body.iter().enumerate() {
        match b {
            b'+' | b'-' => {
                // Only at the start or right after an exponent marker.
                if i != 0 && !matches!(body[i - 1], b'e' | b'E') {
                    return None;
                }
                text.push(b as char);
            }
            b'0'..=b'9' => {
                seen_digit = true;
                text.push(b as char);
            }
            b'.' | b',' => {
                if seen_point {
                    return None;
                }
                seen_point = true;
                text.push('.');
            }
            b'e' | b'E' => text.push('e'),
            b'\'' => {}
            _ => return None,
        }
    }
    if !seen_digit {
        return None;
    }
    text.parse::<f64>().ok()
}

/// `$100.00`, `-$5`, `+$1,50`.
pub fn scan_money(bytes: &[u8]) -> Option<f64> {
    let mut at = 0;
    let mut negative = false;
    match bytes.first()? {
        b'+' => at = 1,
        b'-' => {
            negative = true;
            at = 1;
        }
        _ => {}
    }
    if bytes.get(at) != Some(&b'$') {
        return None;
    }
    let value = scan_decimal(&bytes[at + 1..])?;
    Some(if negative { -value } else { value })
}

/// `12:34`, `1:02:03`, `0:00:00.5`, with optional leading sign. Returns
/// nanoseconds.
pub fn scan_time(bytes: &[u8]) -> Option<i64> {
    let mut at = 0;
    let mut negative = false;
    match bytes.first()? {
        b'+' => at = 1,
        b'-' => {
            negative = true;
            at = 1;
        }
        _ => {}
    }
    let text = core::str::from_utf8(&bytes[at..]).ok()?;
    let mut parts = text.split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds_text = parts.next().unwrap_or("0");
    if parts.next().is_some() {
        return None;
    }
    let seconds: f64 = if seconds_text.is_empty() {
        0.0
    } else {
        seconds_text.parse().ok()?
    };
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    let nanos = (hours * 3600 + minutes * 60) * 1_000_000_000
        + (seconds * 1e9) as i64;
    Some(if negative { -nanos } else { nanos })
}

/// `320x200`, `1.5x2.5`. Pairs are two decimals joined by `x`.
pub fn scan_pair(bytes: &[u8]) -> Option<(f64, f64)> {
    let split = bytes
        .iter()
        .position(|&b| b == b'x' || b == b'X')?;
    let x = scan_decimal(&bytes[..split])?;
    let y = scan_decimal(&bytes[split + 1..])?;
    Some((x, y))
}

/// `1.2.3`, `255.255.255.0` - two or more periods, components 0..=255.
pub fn scan_tuple(bytes: &[u8]) -> Option<Vec<u8>> {
    let text = core::str::from_utf8(bytes).ok()?;
    let mut parts = Vec::new();
    for piece in text.split('.') {
        if piece.is_empty() {
            return None;
        }
        parts.push(piece.parse::<u8>().ok()?);
    }
    if parts.len() < 3 || parts.len() > MAX_TUPLE {
        return None;
    }
    Some(parts)
}

/// Dates: `1-Jan-2017`, `1/jan/2017`, `31-12-1999`, with optional
/// `/time+zone` suffix handled by the caller splitting at the slash.
pub fn scan_date(bytes: &[u8]) -> Option<(u16, u8, u8, i8, i64)> {
    let text = core::str::from_utf8(bytes).ok()?;

    // Optional time part after a slash.
    let (date_text, time_text) = match text.find('/') {
        Some(pos) => (&text[..pos], Some(&text[pos + 1..])),
        None => (text, None),
    };

    let sep = if date_text.contains('-') { '-' } else { '/' };
    let mut parts = date_text.split(sep);
    let day: u8 = parts.next()?.parse().ok()?;
    let month_text = parts.next()?;
    let year_text = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let month: u8 = match month_text.parse::<u8>() {
        Ok(m) => m,
        Err(_) => {
            let lowered = month_text.to_ascii_lowercase();
            let found = MONTH_NAMES
                .iter()
                .position(|name| name.starts_with(&lowered) && lowered.len() >= 3)?;
            (found + 1) as u8
        }
    };

    let mut year: u16 = year_text.parse().ok()?;
    if year_text.len() <= 2 {
        // Two-digit years land in a sliding 1950-2049 window.
        year += if year < 50 { 2000 } else { 1900 };
    }

    if !(1..=12).contains(&month) || day == 0 || day > 31 {
        return None;
    }

    let (zone, nanos) = match time_text {
        None => (0i8, reval_core::cell::NO_DATE_TIME),
        Some(t) => {
            // Zone suffix: +hh:mm or -hh:mm after the time.
            let (time_part, zone_part) = match t.rfind(['+', '-']) {
                Some(pos) if pos > 0 => (&t[..pos], Some(&t[pos..])),
                _ => (t, None),
            };
            let nanos = scan_time(time_part.as_bytes())?;
            let zone = match zone_part {
                None => 0i8,
                Some(z) => {
                    let negative = z.starts_with('-');
                    let mut pieces = z[1..].split(':');
                    let hours: i32 = pieces.next()?.parse().ok()?;
                    let minutes: i32 = match pieces.next() {
                        Some(m) => m.parse().ok()?,
                        None => 0,
                    };
                    let quarters = (hours * 60 + minutes) / 15;
                    if quarters > 127 {
                        return None;
                    }
                    (if negative { -quarters } else { quarters }) as i8
                }
            };
            (zone, nanos)
        }
    };

    Some((year, month, day, zone, nanos))
}

/// Binary payloads: `#{DEADBEEF}` (base 16), `2#{01010101}`, `64#{...}`.
/// Inner whitespace is ignored in every base.
pub fn scan_binary_body(bytes: &[u8], base: u32) -> Option<Vec<u8>> {
    let filtered: Vec<u8> = bytes
        .iter()
        .copied()
        .filter(|b| !b" \t\n\r".contains(b))
        .collect();
    match base {
        16 => hex::decode(&filtered).ok(),
        64 => base64::engine::general_purpose::STANDARD
            .decode(&filtered)
            .ok(),
        2 => {
            if filtered.len() % 8 != 0 {
                return None;
            }
            let mut out = Vec::with_capacity(filtered.len() / 8);
            for chunk in filtered.chunks(8) {
                let mut byte = 0u8;
                for &bit in chunk {
                    byte = (byte << 1)
                        | match bit {
                            b'0' => 0,
                            b'1' => 1,
                            _ => return None,
                        };
                }
                out.push(byte);
            }
            Some(out)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers() {
        assert_eq!(scan_integer(b"123"), Some(123));
        assert_eq!(scan_integer(b"-7"), Some(-7));
        assert_eq!(scan_integer(b"1'200"), Some(1200));
        assert_eq!(scan_integer(b"12a"), None);
        assert_eq!(scan_integer(b"+"), None);
    }

    #[test]
    fn decimals() {
        assert_eq!(scan_decimal(b"12.5"), Some(12.5));
        assert_eq!(scan_decimal(b"1,5"), Some(1.5));
        assert_eq!(scan_decimal(b"+12.3e-4"), Some(12.3e-4));
        assert_eq!(scan_decimal(b"10%"), Some(10.0));
        assert_eq!(scan_decimal(b"1.2.3"), None);
    }

    #[test]
    fn money_and_time() {
        assert_eq!(scan_money(b"$100.00"), Some(100.0));
        assert_eq!(scan_money(b"-$5"), Some(-5.0));
        assert_eq!(scan_time(b"12:34"), Some((12 * 3600 + 34 * 60) * 1_000_000_000));
        assert_eq!(
            scan_time(b"0:00:00.5"),
            Some(500_000_000)
        );
        assert_eq!(scan_time(b"1:99"), None);
    }

    #[test]
    fn pairs_and_tuples() {
        assert_eq!(scan_pair(b"320x200"), Some((320.0, 200.0)));
        assert_eq!(scan_pair(b"1.5x2"), Some((1.5, 2.0)));
        assert_eq!(scan_tuple(b"1.2.3"), Some(vec![1, 2, 3]));
        assert_eq!(scan_tuple(b"255.255.255.0"), Some(vec![255, 255, 255, 0]));
        assert_eq!(scan_tuple(b"1.2"), None);
        assert_eq!(scan_tuple(b"1.300.2"), None);
    }

    #[test]
    fn dates() {
        let (y, m, d, zone, nanos) = scan_date(b"1-Jan-2017").unwrap();
        assert_eq!((y, m, d, zone), (2017, 1, 1, 0));
        assert_eq!(nanos, reval_core::cell::NO_DATE_TIME);

        let (y, m, d, _, nanos) = scan_date(b"31/12/1999/10:20:03").unwrap();
        assert_eq!((y, m, d), (1999, 12, 31));
        assert_eq!(nanos, ((10 * 3600 + 20 * 60 + 3) as i64) * 1_000_000_000);

        let (.., zone, _) = scan_date(b"1-Jan-2017/10:00+5:00").unwrap();
        assert_eq!(zone, 20); // five hours in quarter-hour units

        assert!(scan_date(b"32-Jan-2017").is_none());
    }

    #[test]
    fn binaries() {
        assert_eq!(
            scan_binary_body(b"DEAD BEEF", 16),
            Some(vec![0xDE, 0xAD, 0xBE, 0xEF])
        );
        assert_eq!(scan_binary_body(b"01000001", 2), Some(vec![0x41]));
        assert_eq!(scan_binary_body(b"QQ==", 64), Some(vec![b'A']));
        assert_eq!(scan_binary_body(b"XYZ", 16), None);
    }
}
