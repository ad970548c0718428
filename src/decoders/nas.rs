// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! NAS decoder, 4G EMM/ESM (TS 24.301) and 5G MM/SM (TS 24.501).
//!
//! NAS usually reaches the monitor encapsulated in an S1AP or NGAP NAS-PDU;
//! the RAN decoders call [`parse_nas`] directly and fold the outcome into
//! their message. The standalone decoder handles raw NAS payloads.
//!
//! Ciphered messages are surfaced as `"NAS (ciphered)"` with an unknown
//! result; deciphering is out of scope by design of a passive probe.

use std::{sync::Arc, time::Instant};

use serde_json::json;

use crate::{
    decoders::{DecodeError, Decoder, codec},
    kb::KnowledgeBase,
    models::{
        message::{Direction, Message, MessageResult, NodeType, Protocol},
        packet::Packet,
    },
};

const PD_EPS_SM: u8 = 0x02;
const PD_EPS_MM: u8 = 0x07;
const PD_5GS_SM: u8 = 0x2E;
const PD_5GS_MM: u8 = 0x7E;

/// What a NAS payload parsed down to; shared with the RAN decoders.
#[derive(Debug, Default)]
pub struct NasInfo {
    pub message_type: u8,
    pub message_name: String,
    pub direction: Direction,
    pub result: MessageResult,
    pub ciphered: bool,
    pub emm_cause: Option<u32>,
    pub imsi: Option<String>,
    pub supi: Option<String>,
    pub guti: Option<String>,
    pub bearer_id: Option<u8>,
}

impl NasInfo {
    /// Whether this message travels UE to network. Decides which packet
    /// endpoint is the subscriber side.
    pub fn is_uplink(&self) -> bool {
        matches!(
            self.message_name.as_str(),
            "Attach Request"
                | "Attach Complete"
                | "Detach Request"
                | "Tracking Area Update Request"
                | "Tracking Area Update Complete"
                | "Extended Service Request"
                | "Service Request"
                | "Authentication Response"
                | "Authentication Failure"
                | "Identity Response"
                | "Security Mode Complete"
                | "Registration Request"
                | "Registration Complete"
                | "Deregistration Request"
                | "PDN Connectivity Request"
                | "PDU Session Establishment Request"
                | "PDU Session Release Request"
        )
    }
}

pub fn looks_like_nas(payload: &[u8]) -> bool {
    match payload.first() {
        Some(&b) => {
            let pd = b & 0x0F;
            b == PD_5GS_MM
                || b == PD_5GS_SM
                || pd == PD_EPS_MM
                || pd == PD_EPS_SM
        },
        None => false,
    }
}

/// Parses one NAS message, plaintext or (detectably) ciphered.
pub fn parse_nas(payload: &[u8]) -> Result<NasInfo, DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::truncated("nas", 2, payload.len()));
    }

    match payload[0] {
        PD_5GS_MM => parse_5gmm(payload),
        PD_5GS_SM => parse_5gsm(payload),
        b if b & 0x0F == PD_EPS_MM => parse_emm(payload),
        b if b & 0x0F == PD_EPS_SM => parse_esm(payload),
        b => Err(DecodeError::malformed(
            "nas",
            format!("unknown protocol discriminator 0x{b:02x}"),
        )),
    }
}

fn ciphered_info() -> NasInfo {
    NasInfo {
        message_name: "NAS (ciphered)".to_string(),
        ciphered: true,
        result: MessageResult::Unknown,
        ..Default::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// 4G EMM / ESM

fn parse_emm(payload: &[u8]) -> Result<NasInfo, DecodeError> {
    let security = payload[0] >> 4;
    match security {
        0 => parse_emm_plain(payload),
        // Integrity protected: 6-byte security header, plaintext inside.
        1 | 3 => {
            if payload.len() < 7 {
                return Err(DecodeError::truncated("nas emm", 7, payload.len()));
            }
            parse_emm_plain(&payload[6..])
        },
        2 | 4 => Ok(ciphered_info()),
        // Service request has its own short format.
        12 => Ok(NasInfo {
            message_type: 0,
            message_name: "Service Request".to_string(),
            direction: Direction::Request,
            result: MessageResult::Unknown,
            ..Default::default()
        }),
        other => Err(DecodeError::malformed(
            "nas emm",
            format!("unknown security header type {other}"),
        )),
    }
}

fn parse_emm_plain(payload: &[u8]) -> Result<NasInfo, DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::truncated("nas emm", 2, payload.len()));
    }
    let msg_type = payload[1];
    let (name, direction) = emm_message(msg_type);

    let mut info = NasInfo {
        message_type: msg_type,
        message_name: name.to_string(),
        direction,
        result: MessageResult::Unknown,
        ..Default::default()
    };

    match msg_type {
        // Attach Request: NAS KSI + attach type nibble, then LV identity.
        0x41 | 0x45 => {
            if payload.len() > 3 {
                let len = payload[2 + 1] as usize;
                // One spare/type byte sits between msg type and the LV.
                read_mobile_identity(payload.get(4..4 + len), &mut info);
            }
        },
        // Identity Response: LV identity directly after the message type.
        0x56 => {
            if payload.len() > 2 {
                let len = payload[2] as usize;
                read_mobile_identity(payload.get(3..3 + len), &mut info);
            }
        },
        // Attach Accept carries the GUTI deeper in optional IEs; the
        // correlation value comes from the session, not re-parsed here.
        0x42 => info.result = MessageResult::Success,
        0x43 => info.result = MessageResult::Success,
        0x46 => info.result = MessageResult::Success,
        // Reject family: EMM cause byte right after the message type.
        0x44 | 0x4B | 0x4E => {
            if payload.len() > 2 {
                info.emm_cause = Some(u32::from(payload[2]));
            }
            info.result = MessageResult::Failure;
        },
        _ => {},
    }

    Ok(info)
}

fn emm_message(msg_type: u8) -> (&'static str, Direction) {
    match msg_type {
        0x41 => ("Attach Request", Direction::Request),
        0x42 => ("Attach Accept", Direction::Response),
        0x43 => ("Attach Complete", Direction::Request),
        0x44 => ("Attach Reject", Direction::Response),
        0x45 => ("Detach Request", Direction::Request),
        0x46 => ("Detach Accept", Direction::Response),
        0x48 => ("Tracking Area Update Request", Direction::Request),
        0x49 => ("Tracking Area Update Accept", Direction::Response),
        0x4A => ("Tracking Area Update Complete", Direction::Request),
        0x4B => ("Tracking Area Update Reject", Direction::Response),
        0x4C => ("Extended Service Request", Direction::Request),
        0x4E => ("Service Reject", Direction::Response),
        0x50 => ("GUTI Reallocation Command", Direction::Request),
        0x52 => ("Authentication Request", Direction::Request),
        0x53 => ("Authentication Response", Direction::Response),
        0x54 => ("Authentication Reject", Direction::Response),
        0x55 => ("Identity Request", Direction::Request),
        0x56 => ("Identity Response", Direction::Response),
        0x5C => ("Authentication Failure", Direction::Response),
        0x5D => ("Security Mode Command", Direction::Request),
        0x5E => ("Security Mode Complete", Direction::Response),
        0x5F => ("Security Mode Reject", Direction::Response),
        0x60 => ("EMM Status", Direction::Unknown),
        0x61 => ("EMM Information", Direction::Request),
        _ => ("EMM Message", Direction::Unknown),
    }
}

fn parse_esm(payload: &[u8]) -> Result<NasInfo, DecodeError> {
    if payload.len() < 3 {
        return Err(DecodeError::truncated("nas esm", 3, payload.len()));
    }
    let bearer_id = payload[0] >> 4;
    let msg_type = payload[2];
    let (name, direction) = match msg_type {
        0xC1 => (
            "Activate Default EPS Bearer Context Request",
            Direction::Request,
        ),
        0xC2 => (
            "Activate Default EPS Bearer Context Accept",
            Direction::Response,
        ),
        0xC3 => (
            "Activate Default EPS Bearer Context Reject",
            Direction::Response,
        ),
        0xCD => ("PDN Connectivity Request", Direction::Request),
        0xD0 => ("PDN Connectivity Request", Direction::Request),
        0xD1 => ("PDN Connectivity Reject", Direction::Response),
        0xD9 => ("ESM Information Request", Direction::Request),
        0xDA => ("ESM Information Response", Direction::Response),
        _ => ("ESM Message", Direction::Unknown),
    };

    let mut info = NasInfo {
        message_type: msg_type,
        message_name: name.to_string(),
        direction,
        result: MessageResult::Unknown,
        bearer_id: (bearer_id != 0).then_some(bearer_id),
        ..Default::default()
    };
    if name.ends_with("Reject") {
        info.result = MessageResult::Failure;
        if payload.len() > 3 {
            info.emm_cause = Some(u32::from(payload[3]));
        }
    }
    Ok(info)
}

/// EPS mobile identity: digit1 sits in the high nibble of the first byte
/// next to the odd/even flag and the identity type.
fn read_mobile_identity(bytes: Option<&[u8]>, info: &mut NasInfo) {
    let Some(bytes) = bytes else { return };
    if bytes.is_empty() {
        return;
    }
    let id_type = bytes[0] & 0x07;
    match id_type {
        // IMSI
        1 => {
            let mut digits = String::with_capacity(15);
            digits.push((b'0' + (bytes[0] >> 4).min(9)) as char);
            if let Ok(rest) = codec::decode_bcd(&bytes[1..]) {
                digits.push_str(&rest);
            }
            if digits.len() == 15 {
                info.imsi = Some(digits);
            }
        },
        // GUTI
        6 => info.guti = Some(hex::encode(&bytes[1..])),
        _ => {},
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// 5G MM / SM

fn parse_5gmm(payload: &[u8]) -> Result<NasInfo, DecodeError> {
    if payload.len() < 3 {
        return Err(DecodeError::truncated("nas 5gmm", 3, payload.len()));
    }
    let security = payload[1];
    match security {
        0 => parse_5gmm_plain(payload),
        1 | 3 => {
            // 7-byte security header in 5G, plaintext message inside.
            if payload.len() < 10 {
                return Err(DecodeError::truncated(
                    "nas 5gmm",
                    10,
                    payload.len(),
                ));
            }
            parse_5gmm_plain(&payload[7..])
        },
        2 | 4 => Ok(ciphered_info()),
        other => Err(DecodeError::malformed(
            "nas 5gmm",
            format!("unknown security header type {other}"),
        )),
    }
}

fn parse_5gmm_plain(payload: &[u8]) -> Result<NasInfo, DecodeError> {
    if payload.len() < 3 {
        return Err(DecodeError::truncated("nas 5gmm", 3, payload.len()));
    }
    let msg_type = payload[2];
    let (name, direction) = match msg_type {
        0x41 => ("Registration Request", Direction::Request),
        0x42 => ("Registration Accept", Direction::Response),
        0x43 => ("Registration Complete", Direction::Request),
        0x44 => ("Registration Reject", Direction::Response),
        0x45 => ("Deregistration Request", Direction::Request),
        0x46 => ("Deregistration Accept", Direction::Response),
        0x4C => ("Service Request", Direction::Request),
        0x4D => ("Service Reject", Direction::Response),
        0x4E => ("Service Accept", Direction::Response),
        0x56 => ("Authentication Request", Direction::Request),
        0x57 => ("Authentication Response", Direction::Response),
        0x58 => ("Authentication Reject", Direction::Response),
        0x5B => ("Identity Request", Direction::Request),
        0x5C => ("Identity Response", Direction::Response),
        0x5D => ("Security Mode Command", Direction::Request),
        0x5E => ("Security Mode Complete", Direction::Response),
        _ => ("5GMM Message", Direction::Unknown),
    };

    let mut info = NasInfo {
        message_type: msg_type,
        message_name: name.to_string(),
        direction,
        result: MessageResult::Unknown,
        ..Default::default()
    };

    match msg_type {
        // Registration Request: ngKSI + registration type byte, then the
        // 5GS mobile identity with a 2-byte length.
        0x41 => {
            if payload.len() >= 6 {
                let len = codec::read_u16(&payload[4..]) as usize;
                if let Some(identity) = payload.get(6..6 + len) {
                    read_5gs_identity(identity, &mut info);
                }
            }
        },
        0x42 | 0x43 | 0x46 | 0x4E => info.result = MessageResult::Success,
        0x44 | 0x4D | 0x58 => {
            info.result = MessageResult::Failure;
            if payload.len() > 3 {
                info.emm_cause = Some(u32::from(payload[3]));
            }
        },
        _ => {},
    }

    Ok(info)
}

fn parse_5gsm(payload: &[u8]) -> Result<NasInfo, DecodeError> {
    if payload.len() < 4 {
        return Err(DecodeError::truncated("nas 5gsm", 4, payload.len()));
    }
    let msg_type = payload[3];
    let (name, direction) = match msg_type {
        0xC1 => ("PDU Session Establishment Request", Direction::Request),
        0xC2 => ("PDU Session Establishment Accept", Direction::Response),
        0xC3 => ("PDU Session Establishment Reject", Direction::Response),
        0xC9 => ("PDU Session Release Request", Direction::Request),
        0xCB => ("PDU Session Release Command", Direction::Request),
        0xCC => ("PDU Session Release Complete", Direction::Response),
        _ => ("5GSM Message", Direction::Unknown),
    };

    let mut info = NasInfo {
        message_type: msg_type,
        message_name: name.to_string(),
        direction,
        result: MessageResult::Unknown,
        bearer_id: Some(payload[1]),
        ..Default::default()
    };
    if name.ends_with("Reject") {
        info.result = MessageResult::Failure;
        if payload.len() > 4 {
            info.emm_cause = Some(u32::from(payload[4]));
        }
    } else if name.ends_with("Accept") || name.ends_with("Complete") {
        info.result = MessageResult::Success;
    }
    Ok(info)
}

/// 5GS mobile identity. SUCI with the null protection scheme exposes the
/// MSIN in clear; anything else stays opaque.
fn read_5gs_identity(bytes: &[u8], info: &mut NasInfo) {
    if bytes.is_empty() {
        return;
    }
    match bytes[0] & 0x07 {
        // SUCI: flags, PLMN (3), routing indicator (2), scheme (1),
        // home network key id (1), scheme output.
        1 if bytes.len() > 8 => {
            let plmn = codec::decode_plmn(&bytes[1..4]).ok();
            let scheme = bytes[6];
            if scheme == 0
                && let Ok(msin) = codec::decode_bcd(&bytes[8..])
                && let Some(plmn) = plmn
            {
                let supi =
                    format!("imsi-{}{}", plmn.replace('-', ""), msin);
                if supi.len() == 5 + 15 {
                    info.imsi = Some(supi[5..].to_string());
                }
                info.supi = Some(supi);
            }
        },
        // 5G-GUTI
        2 => info.guti = Some(hex::encode(&bytes[1..])),
        _ => {},
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Standalone decoder

#[derive(Debug)]
pub struct NasDecoder {
    kb: Arc<KnowledgeBase>,
}

impl NasDecoder {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl Decoder for NasDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Nas
    }

    fn can_decode(&self, packet: &Packet) -> bool {
        looks_like_nas(&packet.payload)
    }

    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        let started = Instant::now();
        let info = parse_nas(&packet.payload)?;

        // NAS runs between the UE behind the RAN node and the core; the
        // capture point only sees the RAN leg.
        let uplink = info.is_uplink();
        let (src, dst) = if uplink {
            (NodeType::Enb, NodeType::Mme)
        } else {
            (NodeType::Mme, NodeType::Enb)
        };

        let mut builder = Message::builder(Protocol::Nas)
            .message_type(u32::from(info.message_type))
            .message_name(info.message_name.clone())
            .direction(info.direction)
            .result(info.result)
            .nodes(src, dst)
            .detail("ciphered", json!(info.ciphered));

        if let Some(cause) = info.emm_cause {
            let text = self.kb.cause_text(Protocol::Nas, cause);
            builder = builder.cause(cause, text);
        }
        if let Some(guti) = &info.guti {
            builder = builder.detail("guti", json!(guti));
        }
        if let Some(ebi) = info.bearer_id {
            builder = builder.detail("eps_bearer_id", json!(ebi));
        }

        {
            let keys = builder.keys_mut();
            keys.imsi = info.imsi.clone();
            keys.supi = info.supi.clone();
            // Bare NAS has no RAN UE ids; the subscriber-side packet address
            // is the one stable correlation anchor left.
            let ue_side = if uplink {
                packet.five_tuple.src_ip
            } else {
                packet.five_tuple.dst_ip
            };
            keys.ue_ip = Some(ue_side.to_string());
        }

        Ok(builder.build(
            packet.payload.clone(),
            &packet.five_tuple,
            packet.capture_time,
            started.elapsed().as_micros() as u64,
        ))
    }
}
