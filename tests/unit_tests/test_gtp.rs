use std::sync::Arc;

use sigmon_rs::{
    decoders::{Decoder, Gtpv1Decoder, Gtpv2Decoder, codec},
    kb::KnowledgeBase,
    models::message::{Direction, MessageResult, NodeType},
};

use super::udp_packet;

pub fn ie_v2(ie_type: u8, instance: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + value.len());
    out.push(ie_type);
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.push(instance);
    out.extend_from_slice(value);
    out
}

/// GTPv2 message with TEID and sequence present.
pub fn gtpv2_msg(msg_type: u8, teid: u32, seq: u32, ies: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = ies.concat();
    let declared = 8 + body.len();
    let mut out = Vec::with_capacity(4 + declared);
    out.push(0x48); // version 2, TEID flag
    out.push(msg_type);
    out.extend_from_slice(&(declared as u16).to_be_bytes());
    out.extend_from_slice(&teid.to_be_bytes());
    out.extend_from_slice(&seq.to_be_bytes()[1..]);
    out.push(0);
    out.extend_from_slice(&body);
    out
}

pub fn fteid_value(teid: u32, ip: [u8; 4]) -> Vec<u8> {
    let mut out = vec![0x80 | 0x0A];
    out.extend_from_slice(&teid.to_be_bytes());
    out.extend_from_slice(&ip);
    out
}

fn ie_v1(ie_type: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + value.len());
    out.push(ie_type);
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    out
}

fn gtpv1_msg(msg_type: u8, teid: u32, ies: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = ies.concat();
    let mut out = Vec::with_capacity(8 + body.len());
    out.push(0x30); // version 1, PT=1, no optional fields
    out.push(msg_type);
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(&teid.to_be_bytes());
    out.extend_from_slice(&body);
    out
}

fn kb() -> Arc<KnowledgeBase> {
    Arc::new(KnowledgeBase::load(None).expect("kb"))
}

#[test]
fn create_session_request_full_extraction() {
    let imsi = codec::encode_bcd("001010000000001").expect("bcd");
    let apn = codec::encode_apn("internet.mnc001.mcc001.gprs").expect("apn");
    let payload = gtpv2_msg(
        32,
        0,
        0x0000A1,
        &[
            ie_v2(1, 0, &imsi),
            ie_v2(71, 0, &apn),
            ie_v2(87, 0, &fteid_value(0xC0FFEE, [10, 1, 1, 1])),
        ],
    );
    let decoder = Gtpv2Decoder::new(kb());
    let packet = udp_packet(payload, 2123, 2123);

    assert!(decoder.can_decode(&packet));
    let msg = decoder.decode(&packet).expect("decode");

    assert_eq!(msg.message_name, "Create Session Request");
    assert_eq!(msg.direction, Direction::Request);
    assert_eq!(msg.keys.imsi.as_deref(), Some("001010000000001"));
    assert_eq!(msg.keys.apn.as_deref(), Some("internet.mnc001.mcc001.gprs"));
    // Header TEID zero on the initial request; the sender F-TEID wins.
    assert_eq!(msg.keys.teid, Some(0xC0FFEE));
    assert_eq!(msg.keys.sequence_num, Some(0xA1));
    assert_eq!(msg.source.node, NodeType::Mme);
    assert_eq!(msg.destination.node, NodeType::Sgw);
}

#[test]
fn create_session_response_cause_classification() {
    let ok = gtpv2_msg(33, 0xC0FFEE, 0xA1, &[ie_v2(2, 0, &[16, 0])]);
    let decoder = Gtpv2Decoder::new(kb());
    let msg = decoder.decode(&udp_packet(ok, 2123, 2123)).expect("decode");
    assert_eq!(msg.message_name, "Create Session Response");
    assert_eq!(msg.result, MessageResult::Success);
    assert_eq!(msg.source.node, NodeType::Sgw);

    let rejected = gtpv2_msg(33, 0xC0FFEE, 0xA2, &[ie_v2(2, 0, &[64, 0])]);
    let msg =
        decoder.decode(&udp_packet(rejected, 2123, 2123)).expect("decode");
    assert_eq!(msg.result, MessageResult::Failure);
    assert_eq!(msg.cause_code, Some(64));
    assert_eq!(msg.cause_text.as_deref(), Some("Context not found"));
}

#[test]
fn paa_yields_ue_ip() {
    let paa = [0x01, 100, 64, 0, 1];
    let payload = gtpv2_msg(33, 1, 1, &[ie_v2(79, 0, &paa)]);
    let msg = Gtpv2Decoder::new(kb())
        .decode(&udp_packet(payload, 2123, 2123))
        .expect("decode");
    assert_eq!(msg.keys.ue_ip.as_deref(), Some("100.64.0.1"));
}

#[test]
fn gtpv1_create_pdp_context() {
    let imsi = codec::encode_bcd("001010000000001").expect("bcd");
    let payload = gtpv1_msg(
        16,
        0,
        &[ie_v1(2, &imsi), ie_v1(17, &0xBEEF01u32.to_be_bytes())],
    );
    let decoder = Gtpv1Decoder::new(kb());
    let packet = udp_packet(payload, 2123, 2123);

    assert!(decoder.can_decode(&packet));
    let msg = decoder.decode(&packet).expect("decode");
    assert_eq!(msg.message_name, "Create PDP Context Request");
    assert_eq!(msg.source.node, NodeType::Sgsn);
    assert_eq!(msg.destination.node, NodeType::Ggsn);
    assert_eq!(msg.keys.imsi.as_deref(), Some("001010000000001"));
    assert_eq!(msg.keys.teid, Some(0xBEEF01));
}

#[test]
fn gtpv1_response_cause() {
    let payload = gtpv1_msg(17, 0xBEEF01, &[ie_v1(1, &[128])]);
    let msg = Gtpv1Decoder::new(kb())
        .decode(&udp_packet(payload, 2123, 2123))
        .expect("decode");
    assert_eq!(msg.result, MessageResult::Success);

    let rejected = gtpv1_msg(17, 0xBEEF01, &[ie_v1(1, &[204])]);
    let msg = Gtpv1Decoder::new(kb())
        .decode(&udp_packet(rejected, 2123, 2123))
        .expect("decode");
    assert_eq!(msg.result, MessageResult::Failure);
    assert_eq!(msg.cause_text.as_deref(), Some("System failure"));
}

#[test]
fn overrunning_ie_is_rejected() {
    let mut payload = gtpv2_msg(32, 0, 1, &[ie_v2(1, 0, &[0x21, 0x43])]);
    // Stretch the IE length beyond the buffer.
    payload[12 + 2] = 0xFF;
    assert!(
        Gtpv2Decoder::new(kb())
            .decode(&udp_packet(payload, 2123, 2123))
            .is_err()
    );
}
