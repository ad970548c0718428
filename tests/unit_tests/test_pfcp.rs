use std::sync::Arc;

use sigmon_rs::{
    decoders::{Decoder, PfcpDecoder},
    kb::KnowledgeBase,
    models::message::{Direction, MessageResult, NodeType},
};

use super::udp_packet;

pub fn ie(ie_type: u16, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + value.len());
    out.extend_from_slice(&ie_type.to_be_bytes());
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    out
}

pub fn fseid_value(seid: u64, ip: [u8; 4]) -> Vec<u8> {
    let mut out = vec![0x02];
    out.extend_from_slice(&seid.to_be_bytes());
    out.extend_from_slice(&ip);
    out
}

/// PFCP message with the SEID flag set.
pub fn pfcp_msg(msg_type: u8, seid: u64, seq: u32, ies: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = ies.concat();
    let declared = 12 + body.len();
    let mut out = Vec::with_capacity(4 + declared);
    out.push(0x21); // version 1, S flag
    out.push(msg_type);
    out.extend_from_slice(&(declared as u16).to_be_bytes());
    out.extend_from_slice(&seid.to_be_bytes());
    out.extend_from_slice(&seq.to_be_bytes()[1..]);
    out.push(0);
    out.extend_from_slice(&body);
    out
}

fn decoder() -> PfcpDecoder {
    PfcpDecoder::new(Arc::new(KnowledgeBase::load(None).expect("kb")))
}

#[test]
fn establishment_request_extracts_fseid() {
    let payload = pfcp_msg(
        50,
        0,
        7,
        &[ie(57, &fseid_value(0x1122_3344_5566_7788, [10, 2, 0, 1]))],
    );
    let packet = udp_packet(payload, 8805, 8805);
    let decoder = decoder();

    assert!(decoder.can_decode(&packet));
    let msg = decoder.decode(&packet).expect("decode");

    assert_eq!(msg.message_name, "Session Establishment Request");
    assert_eq!(msg.direction, Direction::Request);
    assert_eq!(msg.keys.seid, Some(0x1122_3344_5566_7788));
    assert_eq!(msg.keys.sequence_num, Some(7));
    assert_eq!(msg.source.node, NodeType::Smf);
    assert_eq!(msg.destination.node, NodeType::Upf);
}

#[test]
fn response_cause_accepted() {
    let payload = pfcp_msg(51, 0x7788, 7, &[ie(19, &[1])]);
    let msg = decoder().decode(&udp_packet(payload, 8805, 8805)).expect("ok");
    assert_eq!(msg.result, MessageResult::Success);
    assert_eq!(msg.source.node, NodeType::Upf);

    let rejected = pfcp_msg(51, 0x7788, 8, &[ie(19, &[65])]);
    let msg =
        decoder().decode(&udp_packet(rejected, 8805, 8805)).expect("ok");
    assert_eq!(msg.result, MessageResult::Failure);
    assert_eq!(msg.cause_text.as_deref(), Some("Session context not found"));
}

#[test]
fn usage_report_volumes_land_in_details() {
    let mut volume = vec![0x07];
    volume.extend_from_slice(&1000u64.to_be_bytes());
    volume.extend_from_slice(&600u64.to_be_bytes());
    volume.extend_from_slice(&400u64.to_be_bytes());
    let usage_report = ie(66, &volume);
    let payload = pfcp_msg(56, 0x7788, 9, &[ie(80, &usage_report)]);

    let msg = decoder().decode(&udp_packet(payload, 8805, 8805)).expect("ok");
    assert_eq!(msg.message_name, "Session Report Request");
    assert_eq!(msg.source.node, NodeType::Upf);
    assert_eq!(msg.details["volume_uplink"], 600);
    assert_eq!(msg.details["volume_downlink"], 400);
}

#[test]
fn gtpv1_payload_is_not_claimed_off_port() {
    // Version 1 with the GTP PT bit set, on the GTP-C port.
    let payload = vec![0x30, 1, 0, 0, 0, 0, 0, 0];
    assert!(!decoder().can_decode(&udp_packet(payload, 2123, 2123)));
}
