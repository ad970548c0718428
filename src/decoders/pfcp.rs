// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PFCP decoder (TS 29.244, Sxab/N4).
//!
//! PFCP shares its version bits with GTPv1; the claim check therefore also
//! requires the well-known UDP port 8805 or a clear PT bit, and the
//! registry probes PFCP first.

use std::{net::Ipv4Addr, sync::Arc, time::Instant};

use serde_json::json;

use crate::{
    decoders::{DecodeError, Decoder, codec},
    kb::KnowledgeBase,
    models::{
        message::{Direction, Message, MessageResult, NodeType, Protocol},
        packet::Packet,
    },
};

pub const PFCP_PORT: u16 = 8805;
pub const PFCP_CAUSE_ACCEPTED: u32 = 1;

const FLAG_SEID: u8 = 0x01;

const IE_CAUSE: u16 = 19;
/// F-SEID per TS 29.244; some stacks emit the legacy type 21.
const IE_FSEID: u16 = 57;
const IE_FSEID_ALT: u16 = 21;
const IE_NODE_ID: u16 = 60;
const IE_USAGE_REPORT_SRR: u16 = 80;
const IE_VOLUME_MEASUREMENT: u16 = 66;

#[derive(Debug, Clone, Copy)]
struct Ie<'a> {
    ie_type: u16,
    value: &'a [u8],
}

fn walk_ies(body: &[u8]) -> Result<Vec<Ie<'_>>, DecodeError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < body.len() {
        if pos + 4 > body.len() {
            return Err(DecodeError::truncated("pfcp ie", pos + 4, body.len()));
        }
        let ie_type = codec::read_u16(&body[pos..]);
        let len = codec::read_u16(&body[pos + 2..]) as usize;
        let start = pos + 4;
        let end = start + len;
        if end > body.len() {
            return Err(DecodeError::malformed(
                "pfcp ie",
                format!("ie {ie_type} length {len} overruns body"),
            ));
        }
        out.push(Ie { ie_type, value: &body[start..end] });
        pos = end;
    }
    Ok(out)
}

fn message_name(msg_type: u8) -> Option<&'static str> {
    Some(match msg_type {
        1 => "Heartbeat Request",
        2 => "Heartbeat Response",
        5 => "Association Setup Request",
        6 => "Association Setup Response",
        7 => "Association Update Request",
        8 => "Association Update Response",
        9 => "Association Release Request",
        10 => "Association Release Response",
        50 => "Session Establishment Request",
        51 => "Session Establishment Response",
        52 => "Session Modification Request",
        53 => "Session Modification Response",
        54 => "Session Deletion Request",
        55 => "Session Deletion Response",
        56 => "Session Report Request",
        57 => "Session Report Response",
        _ => return None,
    })
}

fn direction_of(name: Option<&str>, msg_type: u8) -> Direction {
    match name {
        Some(n) if n.ends_with("Request") => Direction::Request,
        Some(n) if n.ends_with("Response") => Direction::Response,
        _ => {
            if msg_type % 2 == 1 {
                Direction::Request
            } else {
                Direction::Response
            }
        },
    }
}

/// Session procedures run SMF to UPF; reports originate at the UPF.
fn infer_nodes(msg_type: u8, direction: Direction) -> (NodeType, NodeType) {
    let request_pair = match msg_type {
        56 | 57 => (NodeType::Upf, NodeType::Smf),
        50..=55 => (NodeType::Smf, NodeType::Upf),
        _ => return (NodeType::Unknown, NodeType::Unknown),
    };
    if direction == Direction::Response {
        (request_pair.1, request_pair.0)
    } else {
        request_pair
    }
}

/// F-SEID: flags, 64-bit SEID, then IPv4 when the V4 flag is set.
fn parse_fseid(value: &[u8]) -> Option<(u64, Option<Ipv4Addr>)> {
    if value.len() < 9 {
        return None;
    }
    let seid = codec::read_u64(&value[1..]);
    let has_v4 = value[0] & 0x02 != 0;
    let ipv4 = (has_v4 && value.len() >= 13).then(|| {
        Ipv4Addr::new(value[9], value[10], value[11], value[12])
    });
    Some((seid, ipv4))
}

/// Volume Measurement: flag byte then u64 totals in TOVOL/ULVOL/DLVOL order.
fn parse_volume(value: &[u8]) -> (Option<u64>, Option<u64>) {
    if value.is_empty() {
        return (None, None);
    }
    let flags = value[0];
    let mut pos = 1usize;
    let mut read = |present: bool| -> Option<u64> {
        if !present || pos + 8 > value.len() {
            return None;
        }
        let v = codec::read_u64(&value[pos..]);
        pos += 8;
        Some(v)
    };
    let _total = read(flags & 0x01 != 0);
    let uplink = read(flags & 0x02 != 0);
    let downlink = read(flags & 0x04 != 0);
    (uplink, downlink)
}

#[derive(Debug)]
pub struct PfcpDecoder {
    kb: Arc<KnowledgeBase>,
}

impl PfcpDecoder {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl Decoder for PfcpDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Pfcp
    }

    fn can_decode(&self, packet: &Packet) -> bool {
        let p = &packet.payload;
        // GTPv1 sets the PT bit; PFCP keeps those spare bits clear, which
        // is what separates the two version-1 headers regardless of port.
        p.len() >= 8 && p[0] >> 5 == 1 && p[0] & 0x18 == 0
    }

    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        let started = Instant::now();
        let payload = &packet.payload;
        if payload.len() < 8 {
            return Err(DecodeError::truncated("pfcp header", 8, payload.len()));
        }

        let version = payload[0] >> 5;
        if version != 1 {
            return Err(DecodeError::UnsupportedVersion {
                protocol: "pfcp",
                version,
            });
        }
        let msg_type = payload[1];
        let declared = codec::read_u16(&payload[2..]) as usize;
        if declared + 4 > payload.len() {
            return Err(DecodeError::malformed(
                "pfcp",
                format!(
                    "declared length {declared} overruns payload {}",
                    payload.len()
                ),
            ));
        }

        let has_seid = payload[0] & FLAG_SEID != 0;
        let (header_seid, sequence, body_start) = if has_seid {
            if payload.len() < 16 {
                return Err(DecodeError::truncated(
                    "pfcp seid header",
                    16,
                    payload.len(),
                ));
            }
            (
                Some(codec::read_u64(&payload[4..])),
                codec::read_u24(&payload[12..]),
                16usize,
            )
        } else {
            (None, codec::read_u24(&payload[4..]), 8usize)
        };

        if 4 + declared < body_start {
            return Err(DecodeError::malformed(
                "pfcp",
                format!("declared length {declared} shorter than the header"),
            ));
        }
        let body = &payload[body_start..4 + declared];
        let ies = walk_ies(body)?;

        let mut cause: Option<u32> = None;
        let mut fseid: Option<(u64, Option<Ipv4Addr>)> = None;
        let mut node_id: Option<String> = None;
        let mut vol_up: Option<u64> = None;
        let mut vol_down: Option<u64> = None;

        for ie in &ies {
            match ie.ie_type {
                IE_CAUSE if !ie.value.is_empty() => {
                    cause = Some(u32::from(ie.value[0]));
                },
                IE_FSEID | IE_FSEID_ALT if fseid.is_none() => {
                    fseid = parse_fseid(ie.value);
                },
                IE_NODE_ID if ie.value.len() > 1 => {
                    node_id = match ie.value[0] & 0x0F {
                        0 if ie.value.len() >= 5 => Some(
                            Ipv4Addr::new(
                                ie.value[1], ie.value[2], ie.value[3],
                                ie.value[4],
                            )
                            .to_string(),
                        ),
                        2 => std::str::from_utf8(&ie.value[1..])
                            .ok()
                            .map(str::to_string),
                        _ => None,
                    };
                },
                IE_USAGE_REPORT_SRR => {
                    if let Ok(inner) = walk_ies(ie.value) {
                        for sub in inner {
                            if sub.ie_type == IE_VOLUME_MEASUREMENT {
                                let (up, down) = parse_volume(sub.value);
                                vol_up = up.or(vol_up);
                                vol_down = down.or(vol_down);
                            }
                        }
                    }
                },
                _ => {},
            }
        }

        let name = message_name(msg_type);
        let direction = direction_of(name, msg_type);
        let result = match (direction, cause) {
            (Direction::Request, _) => MessageResult::Unknown,
            (_, Some(PFCP_CAUSE_ACCEPTED)) => MessageResult::Success,
            (_, Some(_)) => MessageResult::Failure,
            (_, None) => MessageResult::Unknown,
        };

        let (src, dst) = infer_nodes(msg_type, direction);
        let mut builder = Message::builder(Protocol::Pfcp)
            .message_type(u32::from(msg_type))
            .message_name(
                name.map(str::to_string)
                    .unwrap_or_else(|| format!("PFCP Message {msg_type}")),
            )
            .direction(direction)
            .result(result)
            .nodes(src, dst)
            .detail(
                "ie_types",
                json!(ies.iter().map(|i| i.ie_type).collect::<Vec<_>>()),
            );

        if let Some(code) = cause {
            let text = self.kb.cause_text(Protocol::Pfcp, code);
            builder = builder.cause(code, text);
        }
        if let Some(n) = &node_id {
            builder = builder.detail("node_id", json!(n));
        }
        if let Some((seid, ip)) = &fseid {
            builder = builder.detail("fseid", json!(seid));
            if let Some(ip) = ip {
                builder = builder.detail("fseid_ipv4", json!(ip.to_string()));
            }
        }
        if let Some(up) = vol_up {
            builder = builder.detail("volume_uplink", json!(up));
        }
        if let Some(down) = vol_down {
            builder = builder.detail("volume_downlink", json!(down));
        }

        {
            let keys = builder.keys_mut();
            keys.sequence_num = Some(sequence);
            keys.seid = match header_seid {
                Some(0) | None => fseid.map(|(s, _)| s),
                s => s,
            };
        }

        Ok(builder.build(
            packet.payload.clone(),
            &packet.five_tuple,
            packet.capture_time,
            started.elapsed().as_micros() as u64,
        ))
    }
}
