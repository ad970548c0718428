// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Diameter (RFC 6733) decoder: fixed 20-byte header via zerocopy, then a
//! linear AVP walk. Only the AVPs the correlation and analysis layers
//! consume get dedicated handling; everything else is recorded by code in
//! the details map.

use std::{sync::Arc, time::Instant};

use bitflags::bitflags;
use serde_json::json;
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout,
    U32,
};

use crate::{
    decoders::{DecodeError, Decoder, codec},
    kb::KnowledgeBase,
    models::{
        message::{Direction, Message, MessageResult, NodeType, Protocol},
        packet::Packet,
    },
};

pub const DIAMETER_HEADER_LEN: usize = 20;

/// Fixed Diameter header, wire layout.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DiameterHeader {
    pub version: u8,
    pub length: [u8; 3],
    pub flags: u8,
    pub command: [u8; 3],
    pub application_id: U32<BigEndian>,
    pub hop_by_hop: U32<BigEndian>,
    pub end_to_end: U32<BigEndian>,
}

impl DiameterHeader {
    pub fn message_length(&self) -> usize {
        codec::read_u24(&self.length) as usize
    }

    pub fn command_code(&self) -> u32 {
        codec::read_u24(&self.command)
    }

    pub fn command_flags(&self) -> CommandFlags {
        CommandFlags::from_bits_truncate(self.flags)
    }
}

bitflags! {
    /// Command flags byte: R(equest), P(roxyable), E(rror), T(retransmit).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u8 {
        const REQUEST = 0x80;
        const PROXYABLE = 0x40;
        const ERROR = 0x20;
        const RETRANSMIT = 0x10;
    }
}

// AVP codes with dedicated extraction.
const AVP_USER_NAME: u32 = 1;
const AVP_SESSION_ID: u32 = 263;
const AVP_ORIGIN_HOST: u32 = 264;
const AVP_RESULT_CODE: u32 = 268;
const AVP_DESTINATION_HOST: u32 = 293;
const AVP_EXPERIMENTAL_RESULT: u32 = 297;
const AVP_EXPERIMENTAL_RESULT_CODE: u32 = 298;
const AVP_MSISDN: u32 = 701;
const AVP_VISITED_PLMN_ID: u32 = 1407;

/// One decoded AVP, value still raw.
#[derive(Debug, Clone, Copy)]
pub struct Avp<'a> {
    pub code: u32,
    pub flags: u8,
    pub vendor_id: Option<u32>,
    pub value: &'a [u8],
}

impl<'a> Avp<'a> {
    pub fn is_mandatory(&self) -> bool {
        self.flags & 0x40 != 0
    }
}

/// Walks the AVP list in `body`, failing on structural damage.
pub fn walk_avps(body: &[u8]) -> Result<Vec<Avp<'_>>, DecodeError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < body.len() {
        if pos + 8 > body.len() {
            return Err(DecodeError::truncated("avp header", pos + 8, body.len()));
        }
        let code = codec::read_u32(&body[pos..]);
        let flags = body[pos + 4];
        let avp_len = codec::read_u24(&body[pos + 5..]) as usize;
        if avp_len < 8 || pos + avp_len > body.len() {
            return Err(DecodeError::malformed(
                "avp",
                format!("avp {code} length {avp_len} overruns body"),
            ));
        }

        let vendor_bit = flags & 0x80 != 0;
        let header_len = if vendor_bit { 12 } else { 8 };
        if avp_len < header_len {
            return Err(DecodeError::malformed(
                "avp",
                format!("avp {code} shorter than its own header"),
            ));
        }
        let vendor_id =
            vendor_bit.then(|| codec::read_u32(&body[pos + 8..]));
        let value = &body[pos + header_len..pos + avp_len];

        out.push(Avp { code, flags, vendor_id, value });

        // Values are padded to the next 4-byte boundary.
        pos += avp_len.next_multiple_of(4);
    }
    Ok(out)
}

/// Diameter application, inferred from the header application id.
fn interface_name(app_id: u32) -> &'static str {
    match app_id {
        0 => "base",
        4 => "Gy",
        16777216 => "Cx",
        16777236 => "Rx",
        16777238 => "Gx",
        16777251 => "S6a",
        16777252 => "S13",
        16777265 => "SWx",
        _ => "unknown",
    }
}

fn command_name(code: u32, request: bool) -> String {
    let base = match code {
        257 => "Capabilities-Exchange",
        271 => "Accounting",
        272 => "Credit-Control",
        275 => "Session-Termination",
        280 => "Device-Watchdog",
        282 => "Disconnect-Peer",
        316 => "Update-Location",
        317 => "Cancel-Location",
        318 => "Authentication-Information",
        319 => "Insert-Subscriber-Data",
        320 => "Delete-Subscriber-Data",
        321 => "Purge-UE",
        322 => "Reset",
        323 => "Notify",
        324 => "ME-Identity-Check",
        _ => {
            return format!(
                "Diameter-{}-{}",
                code,
                if request { "Request" } else { "Answer" }
            );
        },
    };
    format!("{}-{}", base, if request { "Request" } else { "Answer" })
}

fn infer_nodes(app_id: u32, request: bool) -> (NodeType, NodeType) {
    let pair = match interface_name(app_id) {
        "S6a" => (NodeType::Mme, NodeType::Hss),
        "S13" => (NodeType::Mme, NodeType::Unknown),
        "Cx" | "SWx" => (NodeType::Unknown, NodeType::Hss),
        "Gx" | "Gy" => (NodeType::Pgw, NodeType::Unknown),
        _ => (NodeType::Unknown, NodeType::Unknown),
    };
    if request { pair } else { (pair.1, pair.0) }
}

/// Result-Code / Experimental-Result-Code classification per RFC 6733.
pub fn classify_result(code: u32) -> MessageResult {
    match code {
        1000..=1999 => MessageResult::Unknown,
        2000..=2999 => MessageResult::Success,
        _ => MessageResult::Failure,
    }
}

#[derive(Debug)]
pub struct DiameterDecoder {
    kb: Arc<KnowledgeBase>,
}

impl DiameterDecoder {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl Decoder for DiameterDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Diameter
    }

    fn can_decode(&self, packet: &Packet) -> bool {
        let p = &packet.payload;
        if p.len() < DIAMETER_HEADER_LEN || p[0] != 1 {
            return false;
        }
        // Reserved command-flag bits must be clear and the declared length
        // must cover exactly this payload.
        (p[4] & 0x0F) == 0 && codec::read_u24(&p[1..4]) as usize == p.len()
    }

    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        let started = Instant::now();
        let payload = &packet.payload;

        let (header, body) = DiameterHeader::ref_from_prefix(payload)
            .map_err(|_| {
                DecodeError::truncated(
                    "diameter header",
                    DIAMETER_HEADER_LEN,
                    payload.len(),
                )
            })?;
        if header.version != 1 {
            return Err(DecodeError::UnsupportedVersion {
                protocol: "diameter",
                version: header.version,
            });
        }
        let declared = header.message_length();
        if declared != payload.len() {
            return Err(DecodeError::malformed(
                "diameter",
                format!(
                    "declared length {declared} != payload {}",
                    payload.len()
                ),
            ));
        }

        let flags = header.command_flags();
        let request = flags.contains(CommandFlags::REQUEST);
        let command = header.command_code();
        let app_id = header.application_id.get();

        let avps = walk_avps(body)?;

        let mut result_code: Option<u32> = None;
        let mut session_id: Option<String> = None;
        let mut origin_host: Option<String> = None;
        let mut destination_host: Option<String> = None;
        let mut user_name: Option<String> = None;
        let mut msisdn: Option<String> = None;
        let mut plmn: Option<String> = None;

        for avp in &avps {
            match avp.code {
                AVP_RESULT_CODE if avp.value.len() >= 4 => {
                    result_code = Some(codec::read_u32(avp.value));
                },
                AVP_EXPERIMENTAL_RESULT => {
                    for sub in walk_avps(avp.value)? {
                        if sub.code == AVP_EXPERIMENTAL_RESULT_CODE
                            && sub.value.len() >= 4
                        {
                            result_code = Some(codec::read_u32(sub.value));
                        }
                    }
                },
                AVP_SESSION_ID => {
                    session_id = utf8(avp.value);
                },
                AVP_ORIGIN_HOST => origin_host = utf8(avp.value),
                AVP_DESTINATION_HOST => destination_host = utf8(avp.value),
                AVP_USER_NAME => user_name = utf8(avp.value),
                AVP_MSISDN => msisdn = codec::decode_bcd(avp.value).ok(),
                AVP_VISITED_PLMN_ID => {
                    plmn = codec::decode_plmn(avp.value).ok();
                },
                _ => {},
            }
        }

        let direction = if request {
            Direction::Request
        } else {
            Direction::Response
        };
        let result = match (request, result_code) {
            (true, _) => MessageResult::Unknown,
            (false, Some(code)) => classify_result(code),
            (false, None) => {
                if flags.contains(CommandFlags::ERROR) {
                    MessageResult::Failure
                } else {
                    MessageResult::Unknown
                }
            },
        };

        let (src, dst) = infer_nodes(app_id, request);
        let mut builder = Message::builder(Protocol::Diameter)
            .message_type(command)
            .message_name(command_name(command, request))
            .direction(direction)
            .result(result)
            .nodes(src, dst)
            .detail("application_id", json!(app_id))
            .detail("interface", json!(interface_name(app_id)))
            .detail("hop_by_hop", json!(header.hop_by_hop.get()))
            .detail("end_to_end", json!(header.end_to_end.get()))
            .detail(
                "avp_codes",
                json!(avps.iter().map(|a| a.code).collect::<Vec<_>>()),
            );

        if let Some(code) = result_code {
            builder = builder.detail("result_code", json!(code));
            if result == MessageResult::Failure {
                let text = self.kb.cause_text(Protocol::Diameter, code);
                builder = builder.cause(code, text);
            }
        }
        if let Some(host) = &origin_host {
            builder = builder.detail("origin_host", json!(host));
        }
        if let Some(host) = &destination_host {
            builder = builder.detail("destination_host", json!(host));
        }

        {
            let keys = builder.keys_mut();
            keys.diameter_session_id = session_id;
            keys.sequence_num = Some(header.hop_by_hop.get());
            keys.msisdn = msisdn;
            keys.plmn = plmn;
            match user_name {
                Some(name) if name.starts_with("imsi-") => {
                    keys.supi = Some(name.clone());
                    let digits = name.trim_start_matches("imsi-");
                    if digits.len() == 15
                        && digits.bytes().all(|b| b.is_ascii_digit())
                    {
                        keys.imsi = Some(digits.to_string());
                    }
                },
                Some(name)
                    if (6..=15).contains(&name.len())
                        && name.bytes().all(|b| b.is_ascii_digit()) =>
                {
                    keys.imsi = Some(name);
                },
                Some(name) => {
                    keys.supi = Some(name);
                },
                None => {},
            }
        }

        Ok(builder.build(
            packet.payload.clone(),
            &packet.five_tuple,
            packet.capture_time,
            started.elapsed().as_micros() as u64,
        ))
    }
}

fn utf8(value: &[u8]) -> Option<String> {
    std::str::from_utf8(value).ok().map(str::to_string)
}
