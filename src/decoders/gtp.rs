// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! GTPv1-C and GTPv2-C decoders (TS 29.060 / TS 29.274).
//!
//! Version is taken from the top three bits of the first byte. GTPv1 is
//! only claimed when the PT bit says GTP proper (not GTP'); that same bit
//! keeps GTPv1 and PFCP apart, both carry version 1. Information elements
//! are `(type, u16 length, value)` for v1 and `(type, u16 length, instance,
//! value)` for v2.

use std::{net::Ipv4Addr, sync::Arc, time::Instant};

use serde_json::json;
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout,
    U16, U32,
};

use crate::{
    decoders::{DecodeError, Decoder, codec},
    kb::KnowledgeBase,
    models::{
        message::{Direction, Message, MessageResult, NodeType, Protocol},
        packet::Packet,
    },
};

pub const GTP_CAUSE_V1_ACCEPTED: u32 = 128;
pub const GTP_CAUSE_V2_ACCEPTED: u32 = 16;

/// Fixed part of the GTPv1 header, wire layout.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Gtpv1Header {
    pub flags: u8,
    pub msg_type: u8,
    pub length: U16<BigEndian>,
    pub teid: U32<BigEndian>,
}

impl Gtpv1Header {
    pub fn version(&self) -> u8 {
        self.flags >> 5
    }

    /// Protocol Type bit: 1 = GTP, 0 = GTP' (charging).
    pub fn is_gtp(&self) -> bool {
        self.flags & 0x10 != 0
    }

    /// Any of E/S/PN forces the 4-byte optional field block.
    pub fn has_optional(&self) -> bool {
        self.flags & 0x07 != 0
    }

    pub fn has_sequence(&self) -> bool {
        self.flags & 0x02 != 0
    }
}

// GTPv2 flag bits.
const GTPV2_FLAG_TEID: u8 = 0x08;

// GTPv2 IE types with dedicated extraction.
const IE_V2_IMSI: u8 = 1;
const IE_V2_CAUSE: u8 = 2;
const IE_V2_RECOVERY: u8 = 3;
const IE_V2_APN: u8 = 71;
const IE_V2_EBI: u8 = 73;
const IE_V2_MEI: u8 = 75;
const IE_V2_MSISDN: u8 = 76;
const IE_V2_ULI: u8 = 86;
const IE_V2_FTEID: u8 = 87;
const IE_V2_PAA: u8 = 79;
const IE_V2_BEARER_CONTEXT: u8 = 93;

// GTPv1 IE types, decoded in the uniform TLV form.
const IE_V1_CAUSE: u8 = 1;
const IE_V1_IMSI: u8 = 2;
const IE_V1_TEID_DATA: u8 = 16;
const IE_V1_TEID_CONTROL: u8 = 17;
const IE_V1_END_USER_ADDRESS: u8 = 128;
const IE_V1_APN: u8 = 131;
const IE_V1_MSISDN: u8 = 134;

#[derive(Debug, Clone, Copy)]
struct Ie<'a> {
    ie_type: u8,
    instance: u8,
    value: &'a [u8],
}

/// GTPv1 information elements: `(type, u16 length, value)`.
fn walk_ies_v1(body: &[u8]) -> Result<Vec<Ie<'_>>, DecodeError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < body.len() {
        if pos + 3 > body.len() {
            return Err(DecodeError::truncated("gtpv1 ie", pos + 3, body.len()));
        }
        let ie_type = body[pos];
        let len = codec::read_u16(&body[pos + 1..]) as usize;
        let start = pos + 3;
        let end = start + len;
        if end > body.len() {
            return Err(DecodeError::malformed(
                "gtpv1 ie",
                format!("ie {ie_type} length {len} overruns body"),
            ));
        }
        out.push(Ie { ie_type, instance: 0, value: &body[start..end] });
        pos = end;
    }
    Ok(out)
}

/// GTPv2 information elements: `(type, u16 length, instance, value)`.
fn walk_ies_v2(body: &[u8]) -> Result<Vec<Ie<'_>>, DecodeError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < body.len() {
        if pos + 4 > body.len() {
            return Err(DecodeError::truncated("gtpv2 ie", pos + 4, body.len()));
        }
        let ie_type = body[pos];
        let len = codec::read_u16(&body[pos + 1..]) as usize;
        let instance = body[pos + 3] & 0x0F;
        let start = pos + 4;
        let end = start + len;
        if end > body.len() {
            return Err(DecodeError::malformed(
                "gtpv2 ie",
                format!("ie {ie_type} length {len} overruns body"),
            ));
        }
        out.push(Ie { ie_type, instance, value: &body[start..end] });
        pos = end;
    }
    Ok(out)
}

/// F-TEID payload: flags+interface byte, TEID, optional IPv4.
fn parse_fteid(value: &[u8]) -> Option<(u32, Option<Ipv4Addr>)> {
    if value.len() < 5 {
        return None;
    }
    let teid = codec::read_u32(&value[1..]);
    let has_v4 = value[0] & 0x80 != 0;
    let ipv4 = (has_v4 && value.len() >= 9).then(|| {
        Ipv4Addr::new(value[5], value[6], value[7], value[8])
    });
    Some((teid, ipv4))
}

/// TAI/ECGI pieces out of a GTPv2 User Location Information IE.
#[derive(Debug, Default)]
struct Uli {
    plmn: Option<String>,
    tac: Option<u32>,
    ecgi: Option<String>,
}

fn parse_uli(value: &[u8]) -> Uli {
    let mut uli = Uli::default();
    if value.is_empty() {
        return uli;
    }
    let flags = value[0];
    let mut pos = 1usize;

    // Skip CGI/SAI/RAI blocks (7 bytes each) when present.
    for mask in [0x01u8, 0x02, 0x04] {
        if flags & mask != 0 {
            pos += 7;
        }
    }
    if flags & 0x08 != 0 && pos + 5 <= value.len() {
        // TAI: PLMN + TAC.
        uli.plmn = codec::decode_plmn(&value[pos..]).ok();
        uli.tac = Some(u32::from(codec::read_u16(&value[pos + 3..])));
        pos += 5;
    }
    if flags & 0x10 != 0 && pos + 7 <= value.len() {
        // ECGI: PLMN + 28-bit E-UTRAN cell id.
        if uli.plmn.is_none() {
            uli.plmn = codec::decode_plmn(&value[pos..]).ok();
        }
        let eci = codec::read_u32(&value[pos + 3..]) & 0x0FFF_FFFF;
        uli.ecgi = Some(format!("{eci:07x}"));
    }
    uli
}

fn v1_message_name(msg_type: u8) -> Option<&'static str> {
    Some(match msg_type {
        1 => "Echo Request",
        2 => "Echo Response",
        16 => "Create PDP Context Request",
        17 => "Create PDP Context Response",
        18 => "Update PDP Context Request",
        19 => "Update PDP Context Response",
        20 => "Delete PDP Context Request",
        21 => "Delete PDP Context Response",
        _ => return None,
    })
}

fn v2_message_name(msg_type: u8) -> Option<&'static str> {
    Some(match msg_type {
        1 => "Echo Request",
        2 => "Echo Response",
        32 => "Create Session Request",
        33 => "Create Session Response",
        34 => "Modify Bearer Request",
        35 => "Modify Bearer Response",
        36 => "Delete Session Request",
        37 => "Delete Session Response",
        95 => "Create Bearer Request",
        96 => "Create Bearer Response",
        97 => "Update Bearer Request",
        98 => "Update Bearer Response",
        99 => "Delete Bearer Request",
        100 => "Delete Bearer Response",
        170 => "Release Access Bearers Request",
        171 => "Release Access Bearers Response",
        _ => return None,
    })
}

/// Direction from the known request/response pairs; parity fallback for
/// everything outside the table.
fn gtp_direction(name: Option<&str>, msg_type: u8) -> Direction {
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

fn v1_nodes(direction: Direction) -> (NodeType, NodeType) {
    match direction {
        Direction::Response => (NodeType::Ggsn, NodeType::Sgsn),
        _ => (NodeType::Sgsn, NodeType::Ggsn),
    }
}

fn v2_nodes(direction: Direction) -> (NodeType, NodeType) {
    match direction {
        Direction::Response => (NodeType::Sgw, NodeType::Mme),
        _ => (NodeType::Mme, NodeType::Sgw),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GTPv1

#[derive(Debug)]
pub struct Gtpv1Decoder {
    kb: Arc<KnowledgeBase>,
}

impl Gtpv1Decoder {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl Decoder for Gtpv1Decoder {
    fn protocol(&self) -> Protocol {
        Protocol::Gtpv1
    }

    fn can_decode(&self, packet: &Packet) -> bool {
        let p = &packet.payload;
        p.len() >= 8 && p[0] >> 5 == 1 && p[0] & 0x10 != 0
    }

    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        let started = Instant::now();
        let payload = &packet.payload;

        let (header, rest) =
            Gtpv1Header::ref_from_prefix(payload).map_err(|_| {
                DecodeError::truncated("gtpv1 header", 8, payload.len())
            })?;
        if header.version() != 1 {
            return Err(DecodeError::UnsupportedVersion {
                protocol: "gtpv1",
                version: header.version(),
            });
        }
        let declared = header.length.get() as usize;
        if declared > rest.len() {
            return Err(DecodeError::malformed(
                "gtpv1",
                format!("declared length {declared} > body {}", rest.len()),
            ));
        }

        let (sequence, body) = if header.has_optional() {
            if rest.len() < 4 {
                return Err(DecodeError::truncated(
                    "gtpv1 optional header",
                    12,
                    payload.len(),
                ));
            }
            let seq = header
                .has_sequence()
                .then(|| u32::from(codec::read_u16(rest)));
            (seq, &rest[4..declared.max(4).min(rest.len())])
        } else {
            (None, &rest[..declared])
        };

        let msg_type = header.msg_type;
        let name = v1_message_name(msg_type);
        let direction = gtp_direction(name, msg_type);

        let ies = walk_ies_v1(body)?;

        let mut cause: Option<u32> = None;
        let mut imsi = None;
        let mut msisdn = None;
        let mut apn = None;
        let mut teid_ie: Option<u32> = None;
        let mut ue_ip = None;

        for ie in &ies {
            match ie.ie_type {
                IE_V1_CAUSE if !ie.value.is_empty() => {
                    cause = Some(u32::from(ie.value[0]));
                },
                IE_V1_IMSI => imsi = codec::decode_imsi(ie.value).ok(),
                IE_V1_MSISDN => {
                    // First byte is TON/NPI.
                    let digits = ie.value.get(1..).unwrap_or_default();
                    msisdn = codec::decode_bcd(digits).ok();
                },
                IE_V1_APN => apn = codec::decode_apn(ie.value).ok(),
                IE_V1_TEID_DATA | IE_V1_TEID_CONTROL
                    if ie.value.len() >= 4 =>
                {
                    teid_ie = Some(codec::read_u32(ie.value));
                },
                IE_V1_END_USER_ADDRESS if ie.value.len() >= 6 => {
                    ue_ip = Some(
                        Ipv4Addr::new(
                            ie.value[2], ie.value[3], ie.value[4], ie.value[5],
                        )
                        .to_string(),
                    );
                },
                _ => {},
            }
        }

        let result = match (direction, cause) {
            (Direction::Request, _) => MessageResult::Unknown,
            (_, Some(GTP_CAUSE_V1_ACCEPTED)) => MessageResult::Success,
            (_, Some(_)) => MessageResult::Failure,
            (_, None) => MessageResult::Unknown,
        };

        let (src, dst) = v1_nodes(direction);
        let mut builder = Message::builder(Protocol::Gtpv1)
            .message_type(u32::from(msg_type))
            .message_name(
                name.map(str::to_string)
                    .unwrap_or_else(|| format!("GTPv1 Message {msg_type}")),
            )
            .direction(direction)
            .result(result)
            .nodes(src, dst)
            .detail("header_teid", json!(header.teid.get()))
            .detail(
                "ie_types",
                json!(ies.iter().map(|i| i.ie_type).collect::<Vec<_>>()),
            );

        if let Some(code) = cause {
            let text = self.kb.cause_text(Protocol::Gtpv1, code);
            builder = builder.cause(code, text);
        }

        {
            let keys = builder.keys_mut();
            keys.imsi = imsi;
            keys.msisdn = msisdn;
            keys.apn = apn;
            keys.sequence_num = sequence;
            keys.ue_ip = ue_ip;
            keys.teid = match header.teid.get() {
                0 => teid_ie,
                t => Some(t),
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

// ─────────────────────────────────────────────────────────────────────────────
// GTPv2

#[derive(Debug)]
pub struct Gtpv2Decoder {
    kb: Arc<KnowledgeBase>,
}

impl Gtpv2Decoder {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl Decoder for Gtpv2Decoder {
    fn protocol(&self) -> Protocol {
        Protocol::Gtpv2
    }

    fn can_decode(&self, packet: &Packet) -> bool {
        let p = &packet.payload;
        p.len() >= 8 && p[0] >> 5 == 2
    }

    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        let started = Instant::now();
        let payload = &packet.payload;
        if payload.len() < 8 {
            return Err(DecodeError::truncated("gtpv2 header", 8, payload.len()));
        }

        let flags = payload[0];
        let msg_type = payload[1];
        let declared = codec::read_u16(&payload[2..]) as usize;
        if declared + 4 > payload.len() {
            return Err(DecodeError::malformed(
                "gtpv2",
                format!(
                    "declared length {declared} overruns payload {}",
                    payload.len()
                ),
            ));
        }

        let has_teid = flags & GTPV2_FLAG_TEID != 0;
        let (teid, seq, body_start) = if has_teid {
            if payload.len() < 12 {
                return Err(DecodeError::truncated(
                    "gtpv2 header",
                    12,
                    payload.len(),
                ));
            }
            (
                Some(codec::read_u32(&payload[4..])),
                codec::read_u24(&payload[8..]),
                12usize,
            )
        } else {
            (None, codec::read_u24(&payload[4..]), 8usize)
        };

        if 4 + declared < body_start {
            return Err(DecodeError::malformed(
                "gtpv2",
                format!("declared length {declared} shorter than the header"),
            ));
        }
        let body = &payload[body_start..4 + declared];
        let ies = walk_ies_v2(body)?;

        let mut cause: Option<u32> = None;
        let mut imsi = None;
        let mut msisdn = None;
        let mut imei = None;
        let mut apn = None;
        let mut fteid: Option<(u32, Option<Ipv4Addr>)> = None;
        let mut ue_ip: Option<String> = None;
        let mut uli: Option<Uli> = None;
        let mut ebi: Option<u8> = None;

        for ie in &ies {
            match ie.ie_type {
                IE_V2_CAUSE if !ie.value.is_empty() => {
                    cause = Some(u32::from(ie.value[0]));
                },
                IE_V2_IMSI => imsi = codec::decode_imsi(ie.value).ok(),
                IE_V2_MSISDN => msisdn = codec::decode_bcd(ie.value).ok(),
                IE_V2_MEI => imei = codec::decode_bcd(ie.value).ok(),
                IE_V2_APN => apn = codec::decode_apn(ie.value).ok(),
                IE_V2_EBI if !ie.value.is_empty() => {
                    ebi = Some(ie.value[0] & 0x0F);
                },
                IE_V2_FTEID if fteid.is_none() => {
                    fteid = parse_fteid(ie.value);
                },
                IE_V2_PAA if ie.value.len() >= 5 => {
                    // PDN type 1 = IPv4.
                    if ie.value[0] & 0x07 == 1 {
                        ue_ip = Some(
                            Ipv4Addr::new(
                                ie.value[1], ie.value[2], ie.value[3],
                                ie.value[4],
                            )
                            .to_string(),
                        );
                    }
                },
                IE_V2_ULI => uli = Some(parse_uli(ie.value)),
                IE_V2_BEARER_CONTEXT => {
                    // Grouped IE; the bearer-level F-TEID lives inside.
                    if let Ok(inner) = walk_ies_v2(ie.value) {
                        for sub in inner {
                            if sub.ie_type == IE_V2_FTEID && fteid.is_none() {
                                fteid = parse_fteid(sub.value);
                            }
                        }
                    }
                },
                IE_V2_RECOVERY => {},
                _ => {},
            }
        }

        let name = v2_message_name(msg_type);
        let direction = gtp_direction(name, msg_type);
        let result = match (direction, cause) {
            (Direction::Request, _) => MessageResult::Unknown,
            (_, Some(GTP_CAUSE_V2_ACCEPTED)) => MessageResult::Success,
            (_, Some(_)) => MessageResult::Failure,
            (_, None) => MessageResult::Unknown,
        };

        let (src, dst) = v2_nodes(direction);
        let mut builder = Message::builder(Protocol::Gtpv2)
            .message_type(u32::from(msg_type))
            .message_name(
                name.map(str::to_string)
                    .unwrap_or_else(|| format!("GTPv2 Message {msg_type}")),
            )
            .direction(direction)
            .result(result)
            .nodes(src, dst)
            .detail(
                "ie_types",
                json!(ies.iter().map(|i| i.ie_type).collect::<Vec<_>>()),
            );

        if let Some(t) = teid {
            builder = builder.detail("header_teid", json!(t));
        }
        if let Some((t, ip)) = &fteid {
            builder = builder.detail("fteid_teid", json!(t));
            if let Some(ip) = ip {
                builder = builder.detail("fteid_ipv4", json!(ip.to_string()));
            }
        }
        if let Some(e) = ebi {
            builder = builder.detail("eps_bearer_id", json!(e));
        }
        if let Some(code) = cause {
            let text = self.kb.cause_text(Protocol::Gtpv2, code);
            builder = builder.cause(code, text);
        }
        if let Some(u) = &uli {
            builder = builder.detail(
                "uli",
                json!({
                    "plmn": u.plmn,
                    "tac": u.tac,
                    "ecgi": u.ecgi,
                }),
            );
        }

        {
            let keys = builder.keys_mut();
            keys.imsi = imsi;
            keys.msisdn = msisdn;
            keys.imei = imei;
            keys.apn = apn;
            keys.sequence_num = Some(seq);
            keys.ue_ip = ue_ip;
            if let Some(u) = &uli {
                keys.plmn = u.plmn.clone();
                keys.cell_id = u.ecgi.clone();
            }
            // The header TEID of an initial request is zero; fall back to
            // the sender's F-TEID so the session still gets a tunnel key.
            keys.teid = match teid {
                Some(0) | None => fteid.map(|(t, _)| t),
                Some(t) => Some(t),
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
