// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! HTTP/2 decoder for the 5G Service Based Interfaces.
//!
//! Walks the frame sequence of one captured TCP segment: HEADERS plus
//! CONTINUATION build the header block, DATA carries the problem-details or
//! resource JSON. The request line / status is reconstituted from the HPACK
//! pseudo-headers and SBI identifiers are pulled from URI path segments and
//! the JSON body.

use std::{sync::Arc, time::Instant};

use serde_json::{Value, json};

use crate::{
    decoders::{
        DecodeError, Decoder, codec,
        hpack::{HeaderBlock, HpackDecoder},
    },
    kb::KnowledgeBase,
    models::{
        message::{Direction, Message, MessageResult, NodeType, Protocol},
        packet::Packet,
        TransportProto,
    },
};

const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const FRAME_DATA: u8 = 0x0;
const FRAME_HEADERS: u8 = 0x1;
const FRAME_CONTINUATION: u8 = 0x9;
const FRAME_MAX_TYPE: u8 = 0x9;

const FLAG_PADDED: u8 = 0x08;
const FLAG_PRIORITY: u8 = 0x20;

#[derive(Debug)]
struct Frame<'a> {
    frame_type: u8,
    flags: u8,
    stream_id: u32,
    payload: &'a [u8],
}

fn walk_frames(mut buf: &[u8]) -> Result<Vec<Frame<'_>>, DecodeError> {
    if buf.starts_with(PREFACE) {
        buf = &buf[PREFACE.len()..];
    }
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        if pos + 9 > buf.len() {
            return Err(DecodeError::truncated(
                "http2 frame header",
                pos + 9,
                buf.len(),
            ));
        }
        let len = codec::read_u24(&buf[pos..]) as usize;
        let frame_type = buf[pos + 3];
        let flags = buf[pos + 4];
        let stream_id = codec::read_u32(&buf[pos + 5..]) & 0x7FFF_FFFF;
        let start = pos + 9;
        let end = start + len;
        if end > buf.len() {
            return Err(DecodeError::malformed(
                "http2 frame",
                format!("frame length {len} overruns segment"),
            ));
        }
        out.push(Frame {
            frame_type,
            flags,
            stream_id,
            payload: &buf[start..end],
        });
        pos = end;
    }
    Ok(out)
}

/// Strips padding and the priority block from a HEADERS payload.
fn header_fragment<'a>(frame: &Frame<'a>) -> &'a [u8] {
    let mut body = frame.payload;
    let mut pad = 0usize;
    if frame.flags & FLAG_PADDED != 0 && !body.is_empty() {
        pad = body[0] as usize;
        body = &body[1..];
    }
    if frame.frame_type == FRAME_HEADERS
        && frame.flags & FLAG_PRIORITY != 0
        && body.len() >= 5
    {
        body = &body[5..];
    }
    if pad <= body.len() {
        body = &body[..body.len() - pad];
    }
    body
}

/// SBI service name from the first URI path segment.
fn service_of(path: &str) -> Option<&str> {
    path.trim_start_matches('/').split('/').next().filter(|s| {
        s.starts_with('n') && s.contains('-')
    })
}

fn operation_of(service: &str, path: &str) -> String {
    match service {
        "nudm-uecm" => "registration".to_string(),
        "nudm-sdm" => "subscription data".to_string(),
        "nsmf-pdusession" => "sm-contexts".to_string(),
        "namf-comm" => "ue-contexts".to_string(),
        _ => path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("resource")
            .to_string(),
    }
}

fn producer_of(service: &str) -> NodeType {
    match service.split('-').next().unwrap_or_default() {
        "nudm" => NodeType::Udm,
        "nsmf" => NodeType::Smf,
        "namf" => NodeType::Amf,
        "nupf" => NodeType::Upf,
        _ => NodeType::Unknown,
    }
}

/// Pulls a SUPI out of URI path segments like
/// `/nudm-uecm/v1/imsi-001010000000001/registrations/amf-3gpp-access`.
fn supi_from_path(path: &str) -> Option<String> {
    path.split('/')
        .find(|seg| seg.starts_with("imsi-") || seg.starts_with("nai-"))
        .map(str::to_string)
}

#[derive(Debug)]
pub struct Http2Decoder {
    kb: Arc<KnowledgeBase>,
}

impl Http2Decoder {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl Decoder for Http2Decoder {
    fn protocol(&self) -> Protocol {
        Protocol::Http2
    }

    fn can_decode(&self, packet: &Packet) -> bool {
        if packet.five_tuple.transport != TransportProto::Tcp {
            return false;
        }
        let p = &packet.payload;
        if p.starts_with(PREFACE) {
            return true;
        }
        if p.len() < 9 {
            return false;
        }
        let len = codec::read_u24(p) as usize;
        p[3] <= FRAME_MAX_TYPE && 9 + len <= p.len()
    }

    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        let started = Instant::now();
        let frames = walk_frames(&packet.payload)?;

        // One captured segment carries one direction of one exchange; the
        // first stream with a header block is the message of interest.
        let mut hpack = HpackDecoder::new();
        let mut headers: Option<HeaderBlock> = None;
        let mut stream_id = 0u32;
        let mut body: Vec<u8> = Vec::new();
        let mut fragment: Vec<u8> = Vec::new();

        for frame in &frames {
            match frame.frame_type {
                FRAME_HEADERS if headers.is_none() => {
                    stream_id = frame.stream_id;
                    fragment.extend_from_slice(header_fragment(frame));
                    // END_HEADERS may only arrive on a CONTINUATION.
                    if frame.flags & 0x04 != 0 {
                        headers = Some(hpack.decode(&fragment)?);
                    }
                },
                FRAME_CONTINUATION
                    if headers.is_none() && frame.stream_id == stream_id =>
                {
                    fragment.extend_from_slice(frame.payload);
                    if frame.flags & 0x04 != 0 {
                        headers = Some(hpack.decode(&fragment)?);
                    }
                },
                FRAME_DATA
                    if stream_id == 0 || frame.stream_id == stream_id =>
                {
                    if stream_id == 0 {
                        stream_id = frame.stream_id;
                    }
                    body.extend_from_slice(frame.payload);
                },
                _ => {},
            }
        }

        let headers = headers.unwrap_or_default();
        let body_json: Option<Value> = (!body.is_empty())
            .then(|| serde_json::from_slice(&body).ok())
            .flatten();

        let status: Option<u32> =
            headers.get(":status").and_then(|s| s.parse().ok());
        let method = headers.get(":method").map(str::to_string);
        let path = headers.get(":path").map(str::to_string);

        let direction = if status.is_some() {
            Direction::Response
        } else if method.is_some() {
            Direction::Request
        } else {
            Direction::Unknown
        };

        let service = path
            .as_deref()
            .and_then(service_of)
            .map(str::to_string);

        let message_name = match (&method, &path, status) {
            (_, _, Some(code)) => format!("HTTP/2 {code} Response"),
            (Some(m), Some(p), None) => match &service {
                Some(svc) => {
                    format!("{m} /{svc} {}", operation_of(svc, p))
                },
                None => format!("{m} {p}"),
            },
            _ => "HTTP/2 Headers".to_string(),
        };

        let result = match status {
            Some(200..=299) => MessageResult::Success,
            Some(_) => MessageResult::Failure,
            None => MessageResult::Unknown,
        };

        // Problem-details body on errors carries the SBI cause string.
        let problem_cause: Option<String> = body_json
            .as_ref()
            .and_then(|v| v.get("cause"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let producer = service.as_deref().map(producer_of);
        let (src, dst) = match (direction, producer) {
            (Direction::Request, Some(p)) => (NodeType::Amf, p),
            (Direction::Response, Some(p)) => (p, NodeType::Amf),
            _ => (NodeType::Unknown, NodeType::Unknown),
        };

        let mut builder = Message::builder(Protocol::Http2)
            .message_type(status.unwrap_or(0))
            .message_name(message_name)
            .direction(direction)
            .result(result)
            .nodes(src, dst)
            .detail("stream_id", json!(stream_id));

        if let Some(m) = &method {
            builder = builder.detail("method", json!(m));
        }
        if let Some(p) = &path {
            builder = builder.detail("path", json!(p));
        }
        if let Some(s) = status {
            builder = builder.detail("status", json!(s));
            if result == MessageResult::Failure {
                let text = problem_cause
                    .clone()
                    .or_else(|| self.kb.cause_text(Protocol::Http2, s));
                builder = builder.cause(s, text);
            }
        }
        if let Some(svc) = &service {
            builder = builder.detail("service", json!(svc));
        }
        if let Some(ct) = headers.get("content-type") {
            builder = builder.detail("content_type", json!(ct));
        }
        if let Some(prio) = headers.get("3gpp-sbi-message-priority") {
            builder = builder.detail("sbi_message_priority", json!(prio));
        }
        if headers.huffman_skipped > 0 {
            builder = builder
                .detail("huffman_skipped", json!(headers.huffman_skipped));
        }
        if let Some(v) = &body_json {
            builder = builder.detail("body", v.clone());
        }

        {
            let keys = builder.keys_mut();
            keys.transaction_id = Some(format!("stream-{stream_id}"));

            let supi = path
                .as_deref()
                .and_then(supi_from_path)
                .or_else(|| {
                    body_json
                        .as_ref()
                        .and_then(|v| v.get("supi"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
            if let Some(supi) = supi {
                if let Some(digits) = supi.strip_prefix("imsi-")
                    && digits.len() == 15
                    && digits.bytes().all(|b| b.is_ascii_digit())
                {
                    keys.imsi = Some(digits.to_string());
                }
                keys.supi = Some(supi);
            }
            keys.dnn = body_json
                .as_ref()
                .and_then(|v| v.get("dnn"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        Ok(builder.build(
            packet.payload.clone(),
            &packet.five_tuple,
            packet.capture_time,
            started.elapsed().as_micros() as u64,
        ))
    }
}
