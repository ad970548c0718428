// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! NGAP (TS 38.413) and S1AP (TS 36.413) decoders.
//!
//! Neither gets a full APER decoder. The PDU choice byte and procedure code
//! sit at fixed offsets; the protocol IE list is recovered with a scanning
//! heuristic over `(id, criticality, length, value)` shapes, which is
//! enough to pull out the UE ids, the Cause and the embedded NAS-PDU. The
//! well-known SCTP ports decide between the two protocols; with a
//! non-standard port S1AP, the far more common capture, wins.

use std::{sync::Arc, time::Instant};

use serde_json::json;

use crate::{
    decoders::{
        DecodeError, Decoder, codec,
        nas::{self, NasInfo},
    },
    kb::KnowledgeBase,
    models::{
        message::{Direction, Message, MessageResult, NodeType, Protocol},
        packet::Packet,
        TransportProto,
    },
};

pub const S1AP_PORT: u16 = 36412;
pub const NGAP_PORT: u16 = 38412;

const PDU_INITIATING: u8 = 0x00;
const PDU_SUCCESSFUL: u8 = 0x20;
const PDU_UNSUCCESSFUL: u8 = 0x40;

// S1AP protocol IE ids.
const S1AP_IE_MME_UE_ID: u16 = 0;
const S1AP_IE_CAUSE: u16 = 2;
const S1AP_IE_ENB_UE_ID: u16 = 8;
const S1AP_IE_NAS_PDU: u16 = 26;

// NGAP protocol IE ids.
const NGAP_IE_AMF_UE_ID: u16 = 10;
const NGAP_IE_CAUSE: u16 = 15;
const NGAP_IE_GUAMI: u16 = 28;
const NGAP_IE_NAS_PDU: u16 = 38;
const NGAP_IE_RAN_UE_ID: u16 = 85;

fn is_ran_pdu(payload: &[u8]) -> bool {
    payload.len() >= 4
        && matches!(
            payload[0],
            PDU_INITIATING | PDU_SUCCESSFUL | PDU_UNSUCCESSFUL
        )
}

/// `(base name, has distinct outcomes)` per procedure code.
fn s1ap_procedure(code: u8) -> (&'static str, bool) {
    match code {
        0 => ("Handover Preparation", true),
        1 => ("Handover Resource Allocation", true),
        2 => ("Handover Notification", false),
        3 => ("Path Switch Request", true),
        4 => ("Handover Cancel", true),
        5 => ("E-RAB Setup", true),
        7 => ("E-RAB Release", true),
        9 => ("Initial Context Setup", true),
        10 => ("Paging", false),
        11 => ("Downlink NAS Transport", false),
        12 => ("Initial UE Message", false),
        13 => ("Uplink NAS Transport", false),
        14 => ("Reset", true),
        15 => ("Error Indication", false),
        17 => ("S1 Setup", true),
        18 => ("UE Context Release Request", false),
        21 => ("UE Context Modification", true),
        23 => ("UE Context Release", true),
        _ => ("S1AP Procedure", false),
    }
}

fn ngap_procedure(code: u8) -> (&'static str, bool) {
    match code {
        4 => ("Downlink NAS Transport", false),
        10 => ("Handover Cancel", true),
        12 => ("Handover Preparation", true),
        13 => ("Handover Resource Allocation", true),
        14 => ("Initial Context Setup", true),
        15 => ("Initial UE Message", false),
        19 => ("NG Reset", true),
        21 => ("NG Setup", true),
        24 => ("Paging", false),
        25 => ("Path Switch Request", true),
        26 => ("PDU Session Resource Modify", true),
        27 => ("PDU Session Resource Release", true),
        29 => ("PDU Session Resource Setup", true),
        41 => ("UE Context Release", true),
        42 => ("UE Context Release Request", false),
        46 => ("Uplink NAS Transport", false),
        _ => ("NGAP Procedure", false),
    }
}

fn pdu_message_name(base: &str, class1: bool, pdu_type: u8) -> String {
    if !class1 {
        return base.to_string();
    }
    match pdu_type {
        PDU_INITIATING => format!("{base} Request"),
        PDU_SUCCESSFUL => format!("{base} Response"),
        _ => format!("{base} Failure"),
    }
}

#[derive(Debug, Clone, Copy)]
struct ScannedIe<'a> {
    id: u16,
    value: &'a [u8],
}

/// Scans the IE list for `(u16 id, criticality, length, value)` shapes of
/// the ids in `known`. Unknown bytes are skipped one at a time, so vendor
/// IEs between known ones do not derail the scan.
fn scan_ies<'a>(body: &'a [u8], known: &[u16]) -> Vec<ScannedIe<'a>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= body.len() {
        let id = codec::read_u16(&body[pos..]);
        let criticality = body[pos + 2];
        if known.contains(&id)
            && matches!(criticality, 0x00 | 0x40 | 0x80)
        {
            let len = body[pos + 3] as usize;
            let start = pos + 4;
            if len < 0x80 && start + len <= body.len() && len > 0 {
                out.push(ScannedIe { id, value: &body[start..start + len] });
                pos = start + len;
                continue;
            }
        }
        pos += 1;
    }
    out
}

/// UE ids arrive as length-prefixed unsigned integers inside the IE value.
fn ie_uint(value: &[u8]) -> Option<u64> {
    if value.is_empty() || value.len() > 8 {
        return None;
    }
    let mut acc = 0u64;
    for b in value {
        acc = (acc << 8) | u64::from(*b);
    }
    Some(acc)
}

#[derive(Debug, Default)]
struct RanIes {
    mme_or_amf_ue_id: Option<u64>,
    enb_or_ran_ue_id: Option<u64>,
    cause: Option<u32>,
    guami: Option<String>,
    nas: Option<NasInfo>,
}

fn collect_ies(body: &[u8], ngap: bool) -> RanIes {
    let known: &[u16] = if ngap {
        &[
            NGAP_IE_AMF_UE_ID,
            NGAP_IE_CAUSE,
            NGAP_IE_GUAMI,
            NGAP_IE_NAS_PDU,
            NGAP_IE_RAN_UE_ID,
        ]
    } else {
        &[
            S1AP_IE_MME_UE_ID,
            S1AP_IE_CAUSE,
            S1AP_IE_ENB_UE_ID,
            S1AP_IE_NAS_PDU,
        ]
    };

    let mut ies = RanIes::default();
    for ie in scan_ies(body, known) {
        match (ngap, ie.id) {
            (true, NGAP_IE_AMF_UE_ID) | (false, S1AP_IE_MME_UE_ID) => {
                ies.mme_or_amf_ue_id = ie_uint(ie.value);
            },
            (true, NGAP_IE_RAN_UE_ID) | (false, S1AP_IE_ENB_UE_ID) => {
                ies.enb_or_ran_ue_id = ie_uint(ie.value);
            },
            (true, NGAP_IE_CAUSE) | (false, S1AP_IE_CAUSE) => {
                ies.cause = ie.value.first().map(|b| u32::from(*b));
            },
            (true, NGAP_IE_GUAMI) => {
                ies.guami = Some(hex::encode(ie.value));
            },
            (true, NGAP_IE_NAS_PDU) | (false, S1AP_IE_NAS_PDU) => {
                if nas::looks_like_nas(ie.value) {
                    ies.nas = nas::parse_nas(ie.value).ok();
                }
            },
            _ => {},
        }
    }
    ies
}

/// Which end initiates each procedure, seen from the RAN side.
fn ran_initiated(code: u8, ngap: bool) -> bool {
    if ngap {
        matches!(code, 15 | 25 | 42 | 46)
    } else {
        matches!(code, 3 | 12 | 13 | 18)
    }
}

fn decode_ran(
    protocol: Protocol,
    kb: &KnowledgeBase,
    packet: &Packet,
) -> Result<Message, DecodeError> {
    let started = Instant::now();
    let payload = &packet.payload;
    if payload.len() < 4 {
        return Err(DecodeError::truncated("ran pdu", 4, payload.len()));
    }

    let pdu_type = payload[0];
    if !is_ran_pdu(payload) {
        return Err(DecodeError::malformed(
            "ran pdu",
            format!("unknown pdu choice 0x{pdu_type:02x}"),
        ));
    }
    let procedure_code = payload[1];

    let ngap = protocol == Protocol::Ngap;
    let (base, class1) = if ngap {
        ngap_procedure(procedure_code)
    } else {
        s1ap_procedure(procedure_code)
    };

    let direction = match pdu_type {
        PDU_INITIATING => Direction::Request,
        _ => Direction::Response,
    };
    let result = match pdu_type {
        PDU_SUCCESSFUL => MessageResult::Success,
        PDU_UNSUCCESSFUL => MessageResult::Failure,
        _ => MessageResult::Unknown,
    };

    let ies = collect_ies(&payload[3..], ngap);

    let ran_node = if ngap { NodeType::Gnb } else { NodeType::Enb };
    let core_node = if ngap { NodeType::Amf } else { NodeType::Mme };
    let ran_first = ran_initiated(procedure_code, ngap)
        == (direction == Direction::Request);
    let (src, dst) = if ran_first {
        (ran_node, core_node)
    } else {
        (core_node, ran_node)
    };

    let mut builder = Message::builder(protocol)
        .message_type(u32::from(procedure_code))
        .message_name(pdu_message_name(base, class1, pdu_type))
        .direction(direction)
        .result(result)
        .nodes(src, dst)
        .detail("procedure_code", json!(procedure_code))
        .detail(
            "pdu_type",
            json!(match pdu_type {
                PDU_INITIATING => "initiating",
                PDU_SUCCESSFUL => "successful-outcome",
                _ => "unsuccessful-outcome",
            }),
        );

    if let Some(guami) = &ies.guami {
        builder = builder.detail("guami", json!(guami));
    }
    if let Some(cause) = ies.cause {
        let failed = result == MessageResult::Failure;
        builder = builder.detail("cause_value", json!(cause));
        if failed {
            builder = builder.cause(cause, kb.cause_text(protocol, cause));
        }
    }

    // Fold the embedded NAS message into this one.
    if let Some(nas_info) = &ies.nas {
        builder = builder
            .detail("nas_message", json!(nas_info.message_name))
            .detail("nas_ciphered", json!(nas_info.ciphered));
        if let Some(cause) = nas_info.emm_cause {
            builder = builder
                .detail("nas_cause", json!(cause));
        }
        let keys = builder.keys_mut();
        keys.imsi = nas_info.imsi.clone();
        keys.supi = nas_info.supi.clone();
    }

    {
        let keys = builder.keys_mut();
        if ngap {
            keys.amf_ue_id = ies.mme_or_amf_ue_id;
            keys.ran_ue_id = ies.enb_or_ran_ue_id;
        } else {
            keys.mme_ue_id =
                ies.mme_or_amf_ue_id.and_then(|v| u32::try_from(v).ok());
            keys.enb_ue_id =
                ies.enb_or_ran_ue_id.and_then(|v| u32::try_from(v).ok());
        }
        // The access-side address anchors this exchange to the same session
        // as the bare NAS legs captured on the same interface.
        let ran_side = if ran_first {
            packet.five_tuple.src_ip
        } else {
            packet.five_tuple.dst_ip
        };
        keys.ue_ip = Some(ran_side.to_string());
    }

    Ok(builder.build(
        packet.payload.clone(),
        &packet.five_tuple,
        packet.capture_time,
        started.elapsed().as_micros() as u64,
    ))
}

#[derive(Debug)]
pub struct NgapDecoder {
    kb: Arc<KnowledgeBase>,
}

impl NgapDecoder {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl Decoder for NgapDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Ngap
    }

    fn can_decode(&self, packet: &Packet) -> bool {
        packet.five_tuple.transport == TransportProto::Sctp
            && is_ran_pdu(&packet.payload)
            && (packet.five_tuple.src_port == NGAP_PORT
                || packet.five_tuple.dst_port == NGAP_PORT)
    }

    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        decode_ran(Protocol::Ngap, &self.kb, packet)
    }
}

#[derive(Debug)]
pub struct S1apDecoder {
    kb: Arc<KnowledgeBase>,
}

impl S1apDecoder {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl Decoder for S1apDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::S1ap
    }

    fn can_decode(&self, packet: &Packet) -> bool {
        packet.five_tuple.transport == TransportProto::Sctp
            && is_ran_pdu(&packet.payload)
    }

    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        decode_ran(Protocol::S1ap, &self.kb, packet)
    }
}
