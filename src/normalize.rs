//! Boundary conversions for ledger-native values.
//!
//! Every numeric field read from the ledger passes through [`normalize_number`]
//! exactly once before it reaches a typed record. Nothing here panics. Ledger
//! output that is malformed degrades to `0` or is passed back unchanged;
//! caller input goes through [`parse_amount`] instead, which refuses it.

use serde_json::{Value, json};

/// Length of a `0x`-prefixed 20-byte account address.
pub const ADDRESS_LEN: usize = 42;

/// Shown instead of an empty address.
pub const EMPTY_ADDRESS_LABEL: &str = "unknown";

const WRAPPED_NUMBER_KEYS: [&str; 3] = ["hex", "_hex", "value"];

/// Converts a raw ledger integer into a `u128`.
///
/// Accepts JSON numbers, decimal strings, `0x` hex strings and wrapped big
/// number objects (`{"type":"BigNumber","hex":"0x.."}` or `{"_hex":"0x.."}`).
/// Absent or non-numeric input yields `0`. Values wider than 128 bits
/// saturate at `u128::MAX`; negative values clamp to `0`.
pub fn normalize_number(raw: &Value) -> u128 {
    match raw {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                u128::from(v)
            } else if n.as_i64().is_some() {
                // only negative i64 values reach this branch
                0
            } else {
                n.as_f64().map(float_to_u128).unwrap_or(0)
            }
        }
        Value::String(s) => parse_numeric_str(s),
        Value::Object(map) => WRAPPED_NUMBER_KEYS
            .iter()
            .find_map(|key| map.get(*key))
            .map(normalize_number)
            .unwrap_or(0),
        Value::Null | Value::Bool(_) | Value::Array(_) => 0,
    }
}

/// [`normalize_number`] narrowed to `u64`, saturating.
pub fn normalize_u64(raw: &Value) -> u64 {
    u64::try_from(normalize_number(raw)).unwrap_or(u64::MAX)
}

/// Encodes an integer the way the ledger client wraps wide integers.
pub fn wrap_number(value: u128) -> Value {
    json!({ "type": "BigNumber", "hex": format!("{value:#x}") })
}

fn float_to_u128(f: f64) -> u128 {
    // `as` saturates and maps NaN to 0
    if f.is_sign_negative() { 0 } else { f as u128 }
}

fn parse_numeric_str(s: &str) -> u128 {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return 0;
        }
        return u128::from_str_radix(hex, 16).unwrap_or(u128::MAX);
    }
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<u128>().unwrap_or(u128::MAX);
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() => float_to_u128(f),
        _ => 0,
    }
}

/// Strict counterpart of [`normalize_number`] for caller-supplied amounts.
///
/// Accepts a non-negative JSON integer, a decimal digit string or a `0x` hex
/// string. Anything else, including fractions, signs, separators and values
/// wider than 128 bits, is `None`.
pub fn parse_amount(raw: &Value) -> Option<u128> {
    match raw {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    return None;
                }
                return u128::from_str_radix(hex, 16).ok();
            }
            if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            s.parse().ok()
        }
        _ => None,
    }
}

/// True for `0x` followed by 40 hex digits, in any case.
pub fn is_hex_address(s: &str) -> bool {
    s.len() == ADDRESS_LEN
        && (s.starts_with("0x") || s.starts_with("0X"))
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Shortens an address to `head…tail` for display.
///
/// Input that is not a well-formed address, or too short to shorten, is
/// returned unchanged. An empty string becomes [`EMPTY_ADDRESS_LABEL`].
pub fn truncate_address(address: &str, head_len: usize, tail_len: usize) -> String {
    if address.is_empty() {
        return EMPTY_ADDRESS_LABEL.to_string();
    }
    if !is_hex_address(address) || head_len.saturating_add(tail_len).saturating_add(1) >= address.len() {
        return address.to_string();
    }
    // ASCII was checked above, so byte slicing is on char boundaries
    format!(
        "{}…{}",
        &address[..head_len],
        &address[address.len() - tail_len..]
    )
}

/// [`truncate_address`] with the usual `6`/`4` split.
pub fn short_address(address: &str) -> String {
    truncate_address(address, 6, 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn absent_and_non_numeric_values_are_zero() {
        assert_eq!(normalize_number(&Value::Null), 0);
        assert_eq!(normalize_number(&json!(true)), 0);
        assert_eq!(normalize_number(&json!([1, 2])), 0);
        assert_eq!(normalize_number(&json!({"foo": 1})), 0);
        assert_eq!(normalize_number(&json!("not a number")), 0);
        assert_eq!(normalize_number(&json!("0x")), 0);
        assert_eq!(normalize_number(&json!("0xZZ")), 0);
    }

    #[test]
    fn wrapped_big_numbers() {
        let price = json!({"type": "BigNumber", "hex": "0x0de0b6b3a7640000"});
        assert_eq!(normalize_number(&price), 1_000_000_000_000_000_000);
        assert_eq!(normalize_number(&json!({"_hex": "0x2a"})), 42);
        assert_eq!(normalize_number(&wrap_number(7)), 7);
    }

    #[test]
    fn strings_and_numbers() {
        assert_eq!(normalize_number(&json!(12)), 12);
        assert_eq!(normalize_number(&json!(-12)), 0);
        assert_eq!(normalize_number(&json!(12.9)), 12);
        assert_eq!(normalize_number(&json!(" 340 ")), 340);
        assert_eq!(normalize_number(&json!("1e3")), 1000);
    }

    #[test]
    fn oversized_values_saturate() {
        let huge = "9".repeat(60);
        assert_eq!(normalize_number(&json!(huge)), u128::MAX);
        let wide_hex = format!("0x{}", "f".repeat(64));
        assert_eq!(normalize_number(&json!(wide_hex)), u128::MAX);
        assert_eq!(normalize_u64(&json!("18446744073709551616")), u64::MAX);
    }

    #[test]
    fn caller_amounts_are_parsed_strictly() {
        assert_eq!(parse_amount(&json!(25)), Some(25));
        assert_eq!(parse_amount(&json!(" 1000000000000000000 ")), Some(1_000_000_000_000_000_000));
        assert_eq!(parse_amount(&json!("0x2a")), Some(42));
        for bad in [
            json!("12,50"),
            json!("abc"),
            json!("1e3"),
            json!(""),
            json!(-1),
            json!(2.5),
            json!(null),
            json!({"_hex": "0x1"}),
            json!("9".repeat(60)),
        ] {
            assert_eq!(parse_amount(&bad), None, "{bad}");
        }
    }

    #[test]
    fn truncation_of_valid_address() {
        let addr = "0x5B38Da6a701c568545dCfcB03FcB875f56beddC4";
        assert_eq!(short_address(addr), "0x5B38…ddC4");
    }

    #[test]
    fn truncation_passes_through_malformed_input() {
        assert_eq!(short_address("alice"), "alice");
        assert_eq!(short_address("0x1234"), "0x1234");
        assert_eq!(short_address(""), EMPTY_ADDRESS_LABEL);
        let addr = "0x5B38Da6a701c568545dCfcB03FcB875f56beddC4";
        assert_eq!(truncate_address(addr, 30, 20), addr);
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            any::<u64>().prop_map(|n| json!(n)),
            any::<f64>().prop_map(|f| json!(f)),
            ".*".prop_map(Value::String),
            "0x[0-9a-fA-F]{0,70}".prop_map(Value::String),
            "[0-9]{1,60}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                inner.clone().prop_map(|v| json!({ "hex": v })),
                inner.prop_map(|v| json!({ "_hex": v, "type": "BigNumber" })),
            ]
        })
    }

    proptest! {
        #[test]
        fn normalize_never_panics(raw in arb_json()) {
            let _ = normalize_number(&raw);
            let _ = normalize_u64(&raw);
        }

        #[test]
        fn unsigned_numbers_round_trip(n in any::<u64>()) {
            prop_assert_eq!(normalize_number(&json!(n)), u128::from(n));
            prop_assert_eq!(normalize_number(&json!(n.to_string())), u128::from(n));
        }

        #[test]
        fn truncated_address_keeps_head_and_tail(body in "[0-9a-fA-F]{40}") {
            let addr = format!("0x{body}");
            let short = short_address(&addr);
            prop_assert!(short.starts_with(&addr[..6]));
            prop_assert!(short.ends_with(&addr[addr.len() - 4..]));
            prop_assert!(short.chars().count() < addr.chars().count());
        }

        #[test]
        fn truncate_never_panics(s in ".*", head in 0usize..60, tail in 0usize..60) {
            let _ = truncate_address(&s, head, tail);
        }
    }
}
