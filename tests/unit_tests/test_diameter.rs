use std::sync::Arc;

use sigmon_rs::{
    decoders::{Decoder, DiameterDecoder},
    kb::KnowledgeBase,
    models::message::{Direction, MessageResult, NodeType, Protocol},
};

use super::udp_packet;

pub fn avp(code: u32, value: &[u8]) -> Vec<u8> {
    let len = 8 + value.len();
    let mut out = Vec::with_capacity(len + 3);
    out.extend_from_slice(&code.to_be_bytes());
    out.push(0x40);
    out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    out.extend_from_slice(value);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

pub fn diameter_msg(
    command: u32,
    app_id: u32,
    request: bool,
    avps: &[Vec<u8>],
) -> Vec<u8> {
    let body: Vec<u8> = avps.concat();
    let total = 20 + body.len();
    let mut out = Vec::with_capacity(total);
    out.push(1);
    out.extend_from_slice(&(total as u32).to_be_bytes()[1..]);
    out.push(if request { 0x80 } else { 0x00 });
    out.extend_from_slice(&command.to_be_bytes()[1..]);
    out.extend_from_slice(&app_id.to_be_bytes());
    out.extend_from_slice(&0x11112222u32.to_be_bytes());
    out.extend_from_slice(&0x33334444u32.to_be_bytes());
    out.extend_from_slice(&body);
    out
}

fn decoder() -> DiameterDecoder {
    let kb = Arc::new(KnowledgeBase::load(None).expect("kb"));
    DiameterDecoder::new(kb)
}

#[test]
fn update_location_request_extracts_identity() {
    let payload = diameter_msg(
        316,
        16777251,
        true,
        &[
            avp(263, b"mme01;1415;1"),
            avp(264, b"mme01.epc.example.org"),
            avp(1, b"001010000000001"),
            avp(1407, &[0x00, 0xF1, 0x10]),
        ],
    );
    let packet = udp_packet(payload, 3868, 3868);
    let decoder = decoder();

    assert!(decoder.can_decode(&packet));
    let msg = decoder.decode(&packet).expect("decode");

    assert_eq!(msg.protocol, Protocol::Diameter);
    assert_eq!(msg.message_name, "Update-Location-Request");
    assert_eq!(msg.direction, Direction::Request);
    assert_eq!(msg.result, MessageResult::Unknown);
    assert_eq!(msg.keys.imsi.as_deref(), Some("001010000000001"));
    assert_eq!(msg.keys.plmn.as_deref(), Some("001-01"));
    assert_eq!(msg.keys.diameter_session_id.as_deref(), Some("mme01;1415;1"));
    assert_eq!(msg.source.node, NodeType::Mme);
    assert_eq!(msg.destination.node, NodeType::Hss);
    assert_eq!(msg.details["interface"], "S6a");
    assert_eq!(msg.timestamp, packet.capture_time);
    assert_eq!(msg.payload_size, packet.payload.len());
}

#[test]
fn answer_with_5001_is_failure_with_kb_cause() {
    let payload = diameter_msg(
        316,
        16777251,
        false,
        &[
            avp(263, b"mme01;1415;1"),
            avp(268, &5001u32.to_be_bytes()),
        ],
    );
    let msg = decoder().decode(&udp_packet(payload, 3868, 3868)).expect("ok");

    assert_eq!(msg.message_name, "Update-Location-Answer");
    assert_eq!(msg.result, MessageResult::Failure);
    assert_eq!(msg.cause_code, Some(5001));
    assert_eq!(
        msg.cause_text.as_deref(),
        Some("DIAMETER_ERROR_USER_UNKNOWN")
    );
    // Answer reverses the request node pair.
    assert_eq!(msg.source.node, NodeType::Hss);
}

#[test]
fn experimental_result_code_is_used() {
    let experimental = avp(298, &5004u32.to_be_bytes());
    let payload =
        diameter_msg(318, 16777251, false, &[avp(297, &experimental)]);
    let msg = decoder().decode(&udp_packet(payload, 3868, 3868)).expect("ok");
    assert_eq!(msg.cause_code, Some(5004));
    assert_eq!(msg.result, MessageResult::Failure);
}

#[test]
fn claim_check_requires_exact_length() {
    let mut payload = diameter_msg(316, 16777251, true, &[]);
    payload.push(0xFF);
    let decoder = decoder();
    assert!(!decoder.can_decode(&udp_packet(payload, 3868, 3868)));

    let mut bad_version = diameter_msg(316, 16777251, true, &[]);
    bad_version[0] = 2;
    assert!(!decoder.can_decode(&udp_packet(bad_version, 3868, 3868)));
}

#[test]
fn truncated_avp_is_an_error() {
    let mut payload = diameter_msg(316, 16777251, true, &[avp(263, b"abcd")]);
    // Corrupt the AVP length so it overruns the body.
    let len = payload.len();
    payload[20 + 7] = 0xFF;
    payload[1..4].copy_from_slice(&(len as u32).to_be_bytes()[1..]);
    assert!(decoder().decode(&udp_packet(payload, 3868, 3868)).is_err());
}
