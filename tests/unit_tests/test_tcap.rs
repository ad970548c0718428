use std::sync::Arc;

use sigmon_rs::{
    decoders::{CapDecoder, Decoder, InapDecoder, MapDecoder, codec},
    kb::KnowledgeBase,
    models::message::{Direction, MessageResult, NodeType, Protocol},
};

use super::sctp_packet;

fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    assert!(value.len() < 128, "test tlv uses short-form lengths");
    let mut out = Vec::with_capacity(2 + value.len());
    out.push(tag);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
    out
}

fn integer(value: u8) -> Vec<u8> {
    tlv(0x02, &[value])
}

/// TCAP Begin with an invoke component and a BCD IMSI parameter.
pub fn tcap_begin_invoke(op: u8, imsi: Option<&str>) -> Vec<u8> {
    let mut invoke = Vec::new();
    invoke.extend_from_slice(&integer(1));
    invoke.extend_from_slice(&integer(op));
    if let Some(imsi) = imsi {
        let bcd = codec::encode_bcd(imsi).expect("bcd");
        invoke.extend_from_slice(&tlv(0x30, &tlv(0x04, &bcd)));
    }
    let components = tlv(0x6C, &tlv(0xA1, &invoke));
    let otid = tlv(0x48, &[0xDE, 0xAD, 0xBE, 0xEF]);
    let mut body = otid;
    body.extend_from_slice(&components);
    tlv(0x62, &body)
}

/// TCAP End with a returnError component.
pub fn tcap_end_error(error_code: u8, imsi: Option<&str>) -> Vec<u8> {
    let mut ret_err = Vec::new();
    ret_err.extend_from_slice(&integer(1));
    ret_err.extend_from_slice(&integer(error_code));
    if let Some(imsi) = imsi {
        let bcd = codec::encode_bcd(imsi).expect("bcd");
        ret_err.extend_from_slice(&tlv(0x30, &tlv(0x04, &bcd)));
    }
    let components = tlv(0x6C, &tlv(0xA3, &ret_err));
    let dtid = tlv(0x49, &[0xDE, 0xAD, 0xBE, 0xEF]);
    let mut body = dtid;
    body.extend_from_slice(&components);
    tlv(0x64, &body)
}

/// TCAP End with a returnResultLast for the given operation.
pub fn tcap_end_result(op: u8) -> Vec<u8> {
    let mut result_seq = Vec::new();
    result_seq.extend_from_slice(&integer(op));
    let mut ret_res = integer(1);
    ret_res.extend_from_slice(&tlv(0x30, &result_seq));
    let components = tlv(0x6C, &tlv(0xA2, &ret_res));
    let dtid = tlv(0x49, &[0xDE, 0xAD, 0xBE, 0xEF]);
    let mut body = dtid;
    body.extend_from_slice(&components);
    tlv(0x64, &body)
}

fn kb() -> Arc<KnowledgeBase> {
    Arc::new(KnowledgeBase::load(None).expect("kb"))
}

#[test]
fn update_location_invoke() {
    let payload = tcap_begin_invoke(2, Some("001010000000001"));
    let decoder = MapDecoder::new(kb());
    let packet = sctp_packet(payload, 1234, 1234);

    assert!(decoder.can_decode(&packet));
    let msg = decoder.decode(&packet).expect("decode");

    assert_eq!(msg.protocol, Protocol::Map);
    assert_eq!(msg.message_name, "updateLocation");
    assert_eq!(msg.direction, Direction::Request);
    assert_eq!(msg.keys.imsi.as_deref(), Some("001010000000001"));
    assert_eq!(msg.keys.transaction_id.as_deref(), Some("deadbeef"));
    // Location category runs VLR to HLR.
    assert_eq!(msg.source.node, NodeType::Vlr);
    assert_eq!(msg.destination.node, NodeType::Hlr);
}

#[test]
fn return_error_is_failure_with_kb_name() {
    let payload = tcap_end_error(34, Some("001010000000001"));
    let msg = MapDecoder::new(kb())
        .decode(&sctp_packet(payload, 1234, 1234))
        .expect("decode");

    assert_eq!(msg.direction, Direction::Response);
    assert_eq!(msg.result, MessageResult::Failure);
    assert_eq!(msg.cause_code, Some(34));
    assert_eq!(msg.cause_text.as_deref(), Some("System Failure"));
    assert_eq!(msg.keys.imsi.as_deref(), Some("001010000000001"));
}

#[test]
fn return_result_names_the_operation() {
    let payload = tcap_end_result(2);
    let msg = MapDecoder::new(kb())
        .decode(&sctp_packet(payload, 1234, 1234))
        .expect("decode");
    assert_eq!(msg.message_name, "updateLocation result");
    assert_eq!(msg.result, MessageResult::Success);
}

#[test]
fn cap_claims_initial_dp_map_does_not() {
    let payload = tcap_begin_invoke(0, None);
    let packet = sctp_packet(payload, 1234, 1234);

    assert!(!MapDecoder::new(kb()).can_decode(&packet));
    let cap = CapDecoder::new(kb());
    assert!(cap.can_decode(&packet));
    let msg = cap.decode(&packet).expect("decode");
    assert_eq!(msg.protocol, Protocol::Cap);
    assert_eq!(msg.message_name, "initialDP");
    assert_eq!(msg.source.node, NodeType::Ssp);
    assert_eq!(msg.destination.node, NodeType::Scp);
}

#[test]
fn inap_takes_the_leftovers() {
    let payload = tcap_begin_invoke(47, None);
    let packet = sctp_packet(payload, 1234, 1234);

    assert!(!MapDecoder::new(kb()).can_decode(&packet));
    assert!(!CapDecoder::new(kb()).can_decode(&packet));
    let msg = InapDecoder::new(kb())
        .decode(&packet)
        .expect("decode");
    assert_eq!(msg.protocol, Protocol::Inap);
    assert_eq!(msg.details["inap_cs_level"], 3);
}

#[test]
fn abort_is_a_failed_dialogue() {
    let payload = tlv(0x67, &tlv(0x49, &[0x01, 0x02, 0x03, 0x04]));
    let msg = MapDecoder::new(kb())
        .decode(&sctp_packet(payload, 1234, 1234))
        .expect("decode");
    assert_eq!(msg.message_name, "TCAP Abort");
    assert_eq!(msg.result, MessageResult::Failure);
}
