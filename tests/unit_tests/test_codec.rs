use proptest::prelude::*;
use sigmon_rs::decoders::codec::{
    decode_apn, decode_bcd, decode_imsi, decode_plmn, encode_apn, encode_bcd,
};

#[test]
fn imsi_rejects_wrong_length() {
    let encoded = encode_bcd("12345").expect("encode");
    assert!(decode_imsi(&encoded).is_err());
}

#[test]
fn bcd_filler_only_at_end() {
    // 0x0F in a low nibble is never legal.
    assert!(decode_bcd(&[0xF1, 0x2F, 0x34]).is_err());
}

#[test]
fn apn_rejects_overlong_label() {
    let mut apn = "a".repeat(64);
    apn.push_str(".gprs");
    assert!(encode_apn(&apn).is_err());
}

#[test]
fn plmn_needs_three_bytes() {
    assert!(decode_plmn(&[0x00, 0xF1]).is_err());
}

proptest! {
    /// decodeBCD(encodeBCD(x)) == x for any 15-digit IMSI.
    #[test]
    fn bcd_round_trip(imsi in "[0-9]{15}") {
        let encoded = encode_bcd(&imsi).expect("encode");
        prop_assert_eq!(decode_imsi(&encoded).expect("decode"), imsi);
    }

    /// Round trip for any even- or odd-length digit string.
    #[test]
    fn bcd_round_trip_any_length(digits in "[0-9]{1,20}") {
        let encoded = encode_bcd(&digits).expect("encode");
        prop_assert_eq!(decode_bcd(&encoded).expect("decode"), digits);
    }

    /// decodeAPN(encodeAPN(x)) == x for dotted APNs without empty labels.
    #[test]
    fn apn_round_trip(labels in prop::collection::vec("[a-z0-9]{1,12}", 1..5)) {
        let apn = labels.join(".");
        let encoded = encode_apn(&apn).expect("encode");
        prop_assert_eq!(decode_apn(&encoded).expect("decode"), apn);
    }
}
