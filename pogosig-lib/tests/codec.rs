//! Bit-exact coordinate conversion and large integer handling

use pogosig_lib::codec::{double_to_long_bits, long_bits_to_double, quote_large_integers};
use pogosig_lib::hashing::parse_hash_body;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

#[test]
fn test_bits_are_self_inverse() {
    let fixed = [
        0.0,
        -0.0,
        1.0,
        -1.0,
        48.8566,
        -122.4194,
        f64::MIN_POSITIVE,
        f64::MAX,
        f64::MIN,
        f64::INFINITY,
        f64::NEG_INFINITY,
        5e-324,
    ];
    for value in fixed {
        let back = long_bits_to_double(double_to_long_bits(value));
        assert_eq!(back.to_bits(), value.to_bits(), "{}", value);
    }

    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..10_000 {
        let bits: i64 = rng.r#gen();
        let value = long_bits_to_double(bits);
        if !value.is_nan() {
            assert_eq!(double_to_long_bits(value), bits);
        }
    }
}

#[test]
fn test_negative_coordinates_have_sign_bit() {
    assert!(double_to_long_bits(-33.8688) < 0);
    assert!(double_to_long_bits(151.2093) > 0);
}

#[test]
fn test_extreme_hashes_survive_parsing() {
    let body = format!(
        r#"{{"locationAuthHash": {}, "locationHash": {}, "requestHashes": [{}, {}, 0]}}"#,
        i64::MIN,
        i64::MAX,
        u64::MAX,
        i64::MAX as u64 + 1
    );
    let (auth, location, requests) = parse_hash_body(&body).unwrap();
    assert_eq!(auth, i64::MIN);
    assert_eq!(location, i64::MAX);
    assert_eq!(requests, vec![u64::MAX, i64::MAX as u64 + 1, 0]);
}

#[test]
fn test_quoting_skips_digits_inside_words() {
    let text = r#"{"note":"id-12345678901234567890","v": 12345678901234567890}"#;
    assert_eq!(
        quote_large_integers(text),
        r#"{"note":"id-12345678901234567890","v": "12345678901234567890"}"#
    );
}
