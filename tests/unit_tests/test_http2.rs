use std::sync::Arc;

use sigmon_rs::{
    decoders::{Decoder, Http2Decoder},
    kb::KnowledgeBase,
    models::message::{Direction, MessageResult, NodeType},
};

use super::tcp_packet;

pub fn frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
    out.push(frame_type);
    out.push(flags);
    out.extend_from_slice(&stream_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Literal header with incremental indexing, plain (non-huffman) value.
pub fn literal(name_index: u8, value: &str) -> Vec<u8> {
    assert!(name_index < 63 && value.len() < 127);
    let mut out = vec![0x40 | name_index];
    out.push(value.len() as u8);
    out.extend_from_slice(value.as_bytes());
    out
}

fn decoder() -> Http2Decoder {
    Http2Decoder::new(Arc::new(KnowledgeBase::load(None).expect("kb")))
}

#[test]
fn sbi_request_with_supi_in_path() {
    let mut block = vec![0x83]; // :method POST (static index 3)
    block.extend_from_slice(&literal(
        4,
        "/nudm-uecm/v1/imsi-001010000000001/registrations/amf-3gpp-access",
    ));
    let payload = frame(0x1, 0x05, 1, &block);
    let packet = tcp_packet(payload, 50000, 8080);
    let decoder = decoder();

    assert!(decoder.can_decode(&packet));
    let msg = decoder.decode(&packet).expect("decode");

    assert_eq!(msg.message_name, "POST /nudm-uecm registration");
    assert_eq!(msg.direction, Direction::Request);
    assert_eq!(msg.keys.supi.as_deref(), Some("imsi-001010000000001"));
    assert_eq!(msg.keys.imsi.as_deref(), Some("001010000000001"));
    assert_eq!(msg.keys.transaction_id.as_deref(), Some("stream-1"));
    assert_eq!(msg.destination.node, NodeType::Udm);
}

#[test]
fn status_2xx_is_success() {
    let block = vec![0x88]; // :status 200 (static index 8)
    let payload = frame(0x1, 0x05, 1, &block);
    let msg = decoder().decode(&tcp_packet(payload, 8080, 50000)).expect("ok");
    assert_eq!(msg.message_name, "HTTP/2 200 Response");
    assert_eq!(msg.direction, Direction::Response);
    assert_eq!(msg.result, MessageResult::Success);
}

#[test]
fn problem_details_cause_on_error() {
    let mut payload = frame(0x1, 0x04, 1, &[0x8D]); // :status 404, END_HEADERS
    let body = br#"{"status":404,"cause":"USER_NOT_FOUND"}"#;
    payload.extend_from_slice(&frame(0x0, 0x01, 1, body));

    let msg = decoder().decode(&tcp_packet(payload, 8080, 50000)).expect("ok");
    assert_eq!(msg.result, MessageResult::Failure);
    assert_eq!(msg.cause_code, Some(404));
    assert_eq!(msg.cause_text.as_deref(), Some("USER_NOT_FOUND"));
}

#[test]
fn continuation_frames_complete_the_block() {
    let rest = literal(4, "/nsmf-pdusession/v1/sm-contexts");
    let mut payload = frame(0x1, 0x00, 3, &[0x83]);
    payload.extend_from_slice(&frame(0x9, 0x04, 3, &rest));

    let msg = decoder().decode(&tcp_packet(payload, 50000, 8080)).expect("ok");
    assert_eq!(msg.message_name, "POST /nsmf-pdusession sm-contexts");
    assert_eq!(msg.keys.transaction_id.as_deref(), Some("stream-3"));
}

#[test]
fn preface_is_tolerated() {
    let mut payload = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n".to_vec();
    payload.extend_from_slice(&frame(0x4, 0x00, 0, &[]));
    payload.extend_from_slice(&frame(0x1, 0x05, 1, &[0x82, 0x84]));
    let packet = tcp_packet(payload, 50000, 8080);
    let decoder = decoder();
    assert!(decoder.can_decode(&packet));
    let msg = decoder.decode(&packet).expect("decode");
    assert_eq!(msg.details["method"], "GET");
}
