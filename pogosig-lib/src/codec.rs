//! Numeric helpers for moving 64-bit values through JSON text without loss.
//!
//! Coordinates travel to the hash service as the raw IEEE-754 bit pattern of
//! the double, reinterpreted as a signed 64-bit integer. Hash values come back
//! as bare integer literals that may not fit a double, so they are quoted
//! before generic JSON parsing and converted back to integers afterwards.

use std::borrow::Cow;
use std::sync::LazyLock;

use bytes::{BufMut, Bytes, BytesMut};
use regex::Regex;

use crate::constants::LARGE_INTEGER_DIGITS;

static BARE_LARGE_INTEGER: LazyLock<Regex> = LazyLock::new(|| {
    // Only literals after a separator or whitespace are considered; digits inside words and floats are left alone.
    Regex::new(&format!(r"([:\[,\s])(-?\d{{{LARGE_INTEGER_DIGITS},}})")).expect("static pattern is valid")
});

/// Reinterprets the bit pattern of `value` as a signed 64-bit integer.
#[inline(always)]
pub fn double_to_long_bits(value: f64) -> i64 {
    value.to_bits() as i64
}

/// Inverse of [`double_to_long_bits`].
#[inline(always)]
pub fn long_bits_to_double(bits: i64) -> f64 {
    f64::from_bits(bits as u64)
}

/// Packs a location as three big-endian doubles (24 bytes).
pub fn location_to_bytes(latitude: f64, longitude: f64, accuracy: f64) -> Bytes {
    let mut buf = BytesMut::with_capacity(24);
    buf.put_f64(latitude);
    buf.put_f64(longitude);
    buf.put_f64(accuracy);
    buf.freeze()
}

/// Replaces each quoted placeholder token with the unquoted decimal digits of
/// its value, so the field stays numeric on the wire.
///
/// Only the first occurrence of each token is replaced.
pub fn patch_large_integers(json: &str, placeholders: &[(&str, i64)]) -> String {
    let mut patched = json.to_string();
    for (token, value) in placeholders {
        let quoted = format!("\"{token}\"");
        patched = patched.replacen(&quoted, &value.to_string(), 1);
    }
    patched
}

/// Wraps every bare integer literal of 16 or more digits in quotes.
///
/// Returns the input untouched when nothing needs quoting.
pub fn quote_large_integers(text: &str) -> Cow<'_, str> {
    BARE_LARGE_INTEGER.replace_all(text, "$1\"$2\"")
}

/// Parses a decimal string as a signed 64-bit value. Values above `i64::MAX`
/// but within `u64` wrap into the negative range rather than failing.
pub fn parse_i64_wrapping(text: &str) -> Option<i64> {
    let text = text.trim();
    text.parse::<i64>()
        .ok()
        .or_else(|| text.parse::<u64>().ok().map(|v| v as i64))
}

/// Parses a decimal string with unsigned semantics. A leading minus sign is
/// accepted and yields the two's complement representation.
pub fn parse_u64_wrapping(text: &str) -> Option<u64> {
    let text = text.trim();
    text.parse::<u64>()
        .ok()
        .or_else(|| text.parse::<i64>().ok().map(|v| v as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_match_ieee754_layout() {
        assert_eq!(double_to_long_bits(1.0), 0x3FF0_0000_0000_0000);
        assert_eq!(double_to_long_bits(-2.0), 0xC000_0000_0000_0000u64 as i64);
        assert_eq!(double_to_long_bits(0.0), 0);
        assert_eq!(double_to_long_bits(-0.0), i64::MIN);
    }

    #[test]
    fn test_quote_skips_short_and_quoted_values() {
        let text = r#"{"a":123,"b":"1234567890123456789","c":1.2345678901234567}"#;
        assert_eq!(quote_large_integers(text), text);
    }

    #[test]
    fn test_quote_handles_negative_and_array_values() {
        let text = r#"{"a":-1234567890123456789,"b":[12345678901234567,9876543210987654321]}"#;
        assert_eq!(
            quote_large_integers(text),
            r#"{"a":"-1234567890123456789","b":["12345678901234567","9876543210987654321"]}"#
        );
    }

    #[test]
    fn test_fifteen_digits_stay_bare() {
        let text = r#"{"a":123456789012345}"#;
        assert_eq!(quote_large_integers(text), text);
    }

    #[test]
    fn test_patch_unquotes_placeholders() {
        let json = r#"{"Latitude64":"LatValue","Longitude64":"LngValue"}"#;
        let patched = patch_large_integers(json, &[("LatValue", -4593671619917905920), ("LngValue", 42)]);
        assert_eq!(patched, r#"{"Latitude64":-4593671619917905920,"Longitude64":42}"#);
    }

    #[test]
    fn test_wrapping_parsers() {
        assert_eq!(parse_i64_wrapping("18446744073709551615"), Some(-1));
        assert_eq!(parse_i64_wrapping("-5"), Some(-5));
        assert_eq!(parse_u64_wrapping("-1"), Some(u64::MAX));
        assert_eq!(parse_u64_wrapping("12345678901234567890"), Some(12345678901234567890));
        assert_eq!(parse_u64_wrapping("abc"), None);
    }

    #[test]
    fn test_location_block_is_big_endian() {
        let block = location_to_bytes(1.0, 0.0, 0.0);
        assert_eq!(block.len(), 24);
        assert_eq!(&block[..8], &[0x3F, 0xF0, 0, 0, 0, 0, 0, 0]);
    }
}
