//! Property-based tests for the circuit-id token grammar.

use proptest::prelude::*;

use rustbng::{parse_circuit_id, Error, MIN_CIRCUIT_ID_LEN};

proptest! {
    /// Any two-character prefix followed by hex digits decodes to the value
    /// of the hex digits.
    #[test]
    fn valid_tokens_decode_to_hex_value(
        prefix in "[ -~]{2}",
        value in any::<u32>(),
    ) {
        let token = format!("{}{:x}", prefix, value);
        prop_assert_eq!(parse_circuit_id(&token).unwrap(), value);
    }

    /// Uppercase hex digits decode identically.
    #[test]
    fn uppercase_hex_decodes(value in any::<u32>()) {
        let token = format!("0x{:X}", value);
        prop_assert_eq!(parse_circuit_id(&token).unwrap(), value);
    }

    /// Tokens shorter than the minimum framing length fail.
    #[test]
    fn short_tokens_fail(token in "[ -~]{0,2}") {
        prop_assume!(token.len() < MIN_CIRCUIT_ID_LEN);
        prop_assert!(matches!(
            parse_circuit_id(&token),
            Err(Error::MalformedCircuitId(_))
        ));
    }

    /// A non-hex remainder fails regardless of the prefix.
    #[test]
    fn non_hex_remainder_fails(
        prefix in "[ -~]{2}",
        remainder in "[0-9a-f]{0,4}[g-z][0-9a-f]{0,4}",
    ) {
        let token = format!("{}{}", prefix, remainder);
        prop_assert!(matches!(
            parse_circuit_id(&token),
            Err(Error::MalformedCircuitId(_))
        ));
    }
}
