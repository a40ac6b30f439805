//! Property-based tests for payload decoding and response cleanup.

use obd_protocol::{hex_to_bitstring, interpret_result, Decoder, RawResponse};
use proptest::prelude::*;

const DECODERS: [Decoder; 12] = [
    Decoder::MassAirFlow,
    Decoder::PercentScale,
    Decoder::IntakeManifoldPressure,
    Decoder::Rpm,
    Decoder::Speed,
    Decoder::TimingAdvance,
    Decoder::SecondsToMinutes,
    Decoder::Temperature,
    Decoder::FuelTrimPercent,
    Decoder::SupportedPids,
    Decoder::Passthrough,
    Decoder::DtcStatus,
];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Decoding the same payload twice gives the same result.
    #[test]
    fn prop_decode_is_deterministic(idx in 0usize..12, hex in "[0-9A-F]{2,8}") {
        let decoder = DECODERS[idx];
        let first = decoder.decode(&hex).ok();
        let second = decoder.decode(&hex).ok();
        prop_assert_eq!(first, second);
    }

    /// Each hex digit expands to exactly four bits.
    #[test]
    fn prop_bitstring_length(hex in "[0-9a-fA-F]{0,16}") {
        let bits = hex_to_bitstring(&hex).unwrap();
        prop_assert_eq!(bits.len(), hex.len() * 4);
        prop_assert!(bits.chars().all(|c| c == '0' || c == '1'));
    }

    /// Percent-scaled single bytes stay within 0..=100.
    #[test]
    fn prop_percent_scale_range(byte: u8) {
        let value = Decoder::PercentScale
            .decode(&format!("{:02X}", byte))
            .unwrap()
            .as_f64()
            .unwrap();
        prop_assert!((0.0..=100.0).contains(&value));
    }

    /// Arbitrary adapter output never panics and never keeps whitespace.
    #[test]
    fn prop_interpret_result_total(raw in "[ -~\r\n]{0,40}") {
        match interpret_result(&raw) {
            RawResponse::Payload(hex) => prop_assert!(!hex.chars().any(char::is_whitespace)),
            RawResponse::NoData => {}
        }
    }

    /// A well-formed single-line reply loses exactly its 4-char header.
    #[test]
    fn prop_header_dropped(pid: u8, data in proptest::collection::vec(any::<u8>(), 1..4)) {
        let mut raw = format!("41 {:02X}", pid);
        let mut expected = String::new();
        for byte in &data {
            raw.push_str(&format!(" {:02X}", byte));
            expected.push_str(&format!("{:02X}", byte));
        }
        prop_assert_eq!(interpret_result(&raw), RawResponse::Payload(expected));
    }
}
