// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TCAP (SS7) envelope walker plus the MAP, CAP and INAP decoders that live
//! on top of it.
//!
//! The walker is a deliberately small BER reader: single-byte tags, short
//! and two-byte long-form lengths. That subset covers every TCAP capture the
//! monitor cares about; anything fancier is reported as malformed instead of
//! being guessed at.
//!
//! Claim rules between the three protocols: the operation code decides.
//! MAP owns the operation categories of TS 29.002, CAP owns the CAMEL
//! operations outside those ranges, INAP takes whatever TCAP remains. The
//! registry registers them in exactly that order.

use std::{sync::Arc, time::Instant};

use serde_json::json;

use crate::{
    decoders::{DecodeError, Decoder, codec},
    kb::KnowledgeBase,
    models::{
        message::{
            Direction, Message, MessageResult, NodeType, Protocol,
        },
        packet::Packet,
    },
};

const TCAP_BEGIN: u8 = 0x62;
const TCAP_END: u8 = 0x64;
const TCAP_CONTINUE: u8 = 0x65;
const TCAP_ABORT: u8 = 0x67;

const TAG_OTID: u8 = 0x48;
const TAG_DTID: u8 = 0x49;
const TAG_COMPONENTS: u8 = 0x6C;
const TAG_INVOKE: u8 = 0xA1;
const TAG_RETURN_RESULT: u8 = 0xA2;
const TAG_RETURN_ERROR: u8 = 0xA3;
const TAG_REJECT: u8 = 0xA4;
const TAG_INTEGER: u8 = 0x02;

pub fn is_tcap(payload: &[u8]) -> bool {
    matches!(
        payload.first(),
        Some(&TCAP_BEGIN | &TCAP_END | &TCAP_CONTINUE | &TCAP_ABORT)
    )
}

/// One BER TLV slice.
#[derive(Debug, Clone, Copy)]
struct Tlv<'a> {
    tag: u8,
    value: &'a [u8],
}

impl<'a> Tlv<'a> {
    fn is_constructed(&self) -> bool {
        self.tag & 0x20 != 0
    }
}

/// Reads one TLV at `pos`, advancing past it.
fn read_tlv<'a>(
    buf: &'a [u8],
    pos: &mut usize,
) -> Result<Tlv<'a>, DecodeError> {
    let start = *pos;
    if start + 2 > buf.len() {
        return Err(DecodeError::truncated("tcap tlv", start + 2, buf.len()));
    }
    let tag = buf[start];
    if tag & 0x1F == 0x1F {
        return Err(DecodeError::malformed(
            "tcap tlv",
            format!("multi-byte tag 0x{tag:02x} at offset {start}"),
        ));
    }

    let mut cursor = start + 1;
    let first_len = buf[cursor];
    cursor += 1;
    let len = match first_len {
        0x00..=0x7F => first_len as usize,
        0x81 => {
            if cursor >= buf.len() {
                return Err(DecodeError::truncated(
                    "tcap length",
                    cursor + 1,
                    buf.len(),
                ));
            }
            let l = buf[cursor] as usize;
            cursor += 1;
            l
        },
        0x82 => {
            if cursor + 2 > buf.len() {
                return Err(DecodeError::truncated(
                    "tcap length",
                    cursor + 2,
                    buf.len(),
                ));
            }
            let l = codec::read_u16(&buf[cursor..]) as usize;
            cursor += 2;
            l
        },
        other => {
            return Err(DecodeError::malformed(
                "tcap length",
                format!("unsupported length form 0x{other:02x}"),
            ));
        },
    };

    let end = cursor + len;
    if end > buf.len() {
        return Err(DecodeError::truncated("tcap value", end, buf.len()));
    }
    *pos = end;
    Ok(Tlv { tag, value: &buf[cursor..end] })
}

/// Children of a constructed TLV, lenient: stops at the first malformed
/// child instead of failing the whole message.
fn children<'a>(value: &'a [u8]) -> Vec<Tlv<'a>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < value.len() {
        match read_tlv(value, &mut pos) {
            Ok(tlv) => out.push(tlv),
            Err(_) => break,
        }
    }
    out
}

fn read_ber_integer(value: &[u8]) -> Option<i64> {
    if value.is_empty() || value.len() > 8 {
        return None;
    }
    let mut acc: i64 = if value[0] & 0x80 != 0 { -1 } else { 0 };
    for b in value {
        acc = (acc << 8) | i64::from(*b);
    }
    Some(acc)
}

/// Depth-limited scan for a BCD-coded 15-digit IMSI behind tag 0x04 or 0x80.
fn scan_imsi(value: &[u8], depth: u8) -> Option<String> {
    if depth == 0 {
        return None;
    }
    for tlv in children(value) {
        if (tlv.tag == 0x04 || tlv.tag == 0x80)
            && (7..=8).contains(&tlv.value.len())
            && let Ok(imsi) = codec::decode_imsi(tlv.value)
        {
            return Some(imsi);
        }
        if tlv.is_constructed()
            && let Some(found) = scan_imsi(tlv.value, depth - 1)
        {
            return Some(found);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComponentKind {
    Invoke,
    ReturnResult,
    ReturnError,
    Reject,
}

/// Flattened view of one parsed TCAP message.
#[derive(Debug)]
struct TcapEnvelope {
    message_tag: u8,
    otid: Option<String>,
    dtid: Option<String>,
    component: Option<ComponentKind>,
    /// Operation code from invoke/returnResult, error code from returnError.
    code: Option<i64>,
    imsi: Option<String>,
}

impl TcapEnvelope {
    fn transaction_id(&self) -> Option<String> {
        self.otid.clone().or_else(|| self.dtid.clone())
    }

    fn direction(&self) -> Direction {
        match self.message_tag {
            TCAP_BEGIN | TCAP_CONTINUE => Direction::Request,
            TCAP_END | TCAP_ABORT => Direction::Response,
            _ => Direction::Unknown,
        }
    }

    fn message_tag_name(&self) -> &'static str {
        match self.message_tag {
            TCAP_BEGIN => "Begin",
            TCAP_END => "End",
            TCAP_CONTINUE => "Continue",
            TCAP_ABORT => "Abort",
            _ => "Unknown",
        }
    }
}

fn parse_envelope(payload: &[u8]) -> Result<TcapEnvelope, DecodeError> {
    let mut pos = 0usize;
    let outer = read_tlv(payload, &mut pos)?;
    if !is_tcap(payload) {
        return Err(DecodeError::malformed(
            "tcap",
            format!("unknown message tag 0x{:02x}", outer.tag),
        ));
    }

    let mut env = TcapEnvelope {
        message_tag: outer.tag,
        otid: None,
        dtid: None,
        component: None,
        code: None,
        imsi: None,
    };

    for tlv in children(outer.value) {
        match tlv.tag {
            TAG_OTID => env.otid = Some(hex::encode(tlv.value)),
            TAG_DTID => env.dtid = Some(hex::encode(tlv.value)),
            TAG_COMPONENTS => parse_components(tlv.value, &mut env),
            _ => {},
        }
    }

    if env.imsi.is_none() {
        env.imsi = scan_imsi(outer.value, 8);
    }

    Ok(env)
}

fn parse_components(value: &[u8], env: &mut TcapEnvelope) {
    for comp in children(value) {
        let kind = match comp.tag {
            TAG_INVOKE => ComponentKind::Invoke,
            TAG_RETURN_RESULT => ComponentKind::ReturnResult,
            TAG_RETURN_ERROR => ComponentKind::ReturnError,
            TAG_REJECT => ComponentKind::Reject,
            _ => continue,
        };
        env.component = Some(kind);
        env.code = component_code(kind, comp.value);
        // First component wins; TCAP captures here carry one per message.
        break;
    }
}

/// Invoke and returnError carry `invokeID, code` as consecutive INTEGERs;
/// returnResult nests the operation inside an inner SEQUENCE.
fn component_code(kind: ComponentKind, value: &[u8]) -> Option<i64> {
    let kids = children(value);
    match kind {
        ComponentKind::Invoke | ComponentKind::ReturnError => {
            let mut integers =
                kids.iter().filter(|t| t.tag == TAG_INTEGER);
            let first = integers.next();
            match integers.next() {
                Some(second) => read_ber_integer(second.value),
                None => first.and_then(|t| read_ber_integer(t.value)),
            }
        },
        ComponentKind::ReturnResult => kids
            .iter()
            .find(|t| t.tag == 0x30)
            .and_then(|seq| {
                children(seq.value)
                    .into_iter()
                    .find(|t| t.tag == TAG_INTEGER)
            })
            .and_then(|t| read_ber_integer(t.value)),
        ComponentKind::Reject => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MAP

/// TS 29.002 operation categories, keyed by operation-code ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapCategory {
    Location,
    SupplementaryServices,
    SubscriberManagement,
    Sms,
    Roaming,
}

pub fn map_category(op: i64) -> Option<MapCategory> {
    match op {
        2..=7 => Some(MapCategory::Location),
        8..=19 => Some(MapCategory::SupplementaryServices),
        20..=30 => Some(MapCategory::SubscriberManagement),
        44..=46 => Some(MapCategory::Sms),
        54..=59 => Some(MapCategory::Roaming),
        _ => None,
    }
}

fn map_operation_name(op: i64) -> String {
    match op {
        2 => "updateLocation".to_string(),
        3 => "cancelLocation".to_string(),
        4 => "provideRoamingNumber".to_string(),
        7 => "insertSubscriberData".to_string(),
        8 => "deleteSubscriberData".to_string(),
        10 => "registerSS".to_string(),
        11 => "eraseSS".to_string(),
        12 => "activateSS".to_string(),
        13 => "deactivateSS".to_string(),
        14 => "interrogateSS".to_string(),
        22 => "sendRoutingInfo".to_string(),
        23 => "updateGprsLocation".to_string(),
        44 => "mt-forwardSM".to_string(),
        45 => "sendRoutingInfoForSM".to_string(),
        46 => "mo-forwardSM".to_string(),
        56 => "sendAuthenticationInfo".to_string(),
        57 => "restoreData".to_string(),
        58 => "sendIMSI".to_string(),
        59 => "processUnstructuredSS-Request".to_string(),
        other => format!("map-operation-{other}"),
    }
}

fn map_nodes(category: Option<MapCategory>) -> (NodeType, NodeType) {
    match category {
        Some(MapCategory::Location) => (NodeType::Vlr, NodeType::Hlr),
        Some(MapCategory::SupplementaryServices) => {
            (NodeType::Msc, NodeType::Hlr)
        },
        Some(MapCategory::SubscriberManagement) => {
            (NodeType::Hlr, NodeType::Vlr)
        },
        Some(MapCategory::Sms) => (NodeType::Msc, NodeType::Hlr),
        Some(MapCategory::Roaming) => (NodeType::Msc, NodeType::Hlr),
        None => (NodeType::Unknown, NodeType::Unknown),
    }
}

/// Shared decode body for the TCAP family; only naming and node inference
/// differ between MAP, CAP and INAP.
fn decode_tcap_family(
    protocol: Protocol,
    kb: &KnowledgeBase,
    packet: &Packet,
) -> Result<Message, DecodeError> {
    let started = Instant::now();
    let env = parse_envelope(&packet.payload)?;

    let (message_name, nodes, cs_level) = match protocol {
        Protocol::Map => {
            let cat = env.code.and_then(map_category);
            (tcap_message_name(&env, map_operation_name), map_nodes(cat), None)
        },
        Protocol::Cap => (
            tcap_message_name(&env, cap_operation_name),
            cap_nodes(&env),
            None,
        ),
        _ => {
            let level = env.code.map(inap_cs_level);
            (
                tcap_message_name(&env, inap_operation_name),
                cap_nodes(&env),
                level,
            )
        },
    };

    let mut builder = Message::builder(protocol)
        .message_type(u32::from(env.message_tag))
        .message_name(message_name)
        .direction(env.direction());

    let (result, cause) = classify(&env);
    builder = builder.result(result);
    if let Some(code) = cause {
        let text = kb
            .cause_text(protocol, code)
            .or_else(|| kb.cause_text(Protocol::Map, code));
        builder = builder.cause(code, text);
    }

    let (mut src, mut dst) = nodes;
    if env.direction() == Direction::Response {
        std::mem::swap(&mut src, &mut dst);
    }
    builder = builder.nodes(src, dst);

    builder = builder
        .detail("tcap_message", json!(env.message_tag_name()))
        .detail("component", json!(component_name(env.component)));
    if let Some(code) = env.code {
        builder = builder.detail("operation_code", json!(code));
    }
    if let Some(level) = cs_level {
        builder = builder.detail("inap_cs_level", json!(level));
    }

    {
        let keys = builder.keys_mut();
        keys.imsi = env.imsi.clone();
        keys.transaction_id = env.transaction_id();
    }

    Ok(builder.build(
        packet.payload.clone(),
        &packet.five_tuple,
        packet.capture_time,
        started.elapsed().as_micros() as u64,
    ))
}

fn component_name(kind: Option<ComponentKind>) -> &'static str {
    match kind {
        Some(ComponentKind::Invoke) => "invoke",
        Some(ComponentKind::ReturnResult) => "returnResultLast",
        Some(ComponentKind::ReturnError) => "returnError",
        Some(ComponentKind::Reject) => "reject",
        None => "none",
    }
}

fn tcap_message_name(
    env: &TcapEnvelope,
    op_name: fn(i64) -> String,
) -> String {
    match (env.message_tag, env.component, env.code) {
        (TCAP_ABORT, _, _) => "TCAP Abort".to_string(),
        (_, Some(ComponentKind::Invoke), Some(op)) => op_name(op),
        (_, Some(ComponentKind::ReturnResult), Some(op)) => {
            format!("{} result", op_name(op))
        },
        (_, Some(ComponentKind::ReturnError), _) => "returnError".to_string(),
        (_, Some(ComponentKind::Reject), _) => "reject".to_string(),
        (tag, _, _) => format!(
            "TCAP {}",
            match tag {
                TCAP_BEGIN => "Begin",
                TCAP_END => "End",
                TCAP_CONTINUE => "Continue",
                _ => "Unknown",
            }
        ),
    }
}

fn classify(env: &TcapEnvelope) -> (MessageResult, Option<u32>) {
    match (env.message_tag, env.component) {
        (TCAP_ABORT, _) => (MessageResult::Failure, None),
        (_, Some(ComponentKind::ReturnError)) => (
            MessageResult::Failure,
            env.code.and_then(|c| u32::try_from(c).ok()),
        ),
        (_, Some(ComponentKind::Reject)) => (MessageResult::Failure, None),
        (TCAP_END, _) => (MessageResult::Success, None),
        _ => (MessageResult::Unknown, None),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CAP / INAP

/// CAMEL operations claimed by CAP: the TS 29.078 codes that do not collide
/// with the MAP categories above.
const CAP_OPS: [i64; 12] = [0, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41];

fn cap_operation_name(op: i64) -> String {
    match op {
        0 => "initialDP".to_string(),
        31 => "continue".to_string(),
        33 => "resetTimer".to_string(),
        34 => "furnishChargingInformation".to_string(),
        35 => "applyCharging".to_string(),
        36 => "applyChargingReport".to_string(),
        41 => "activityTest".to_string(),
        other => format!("cap-operation-{other}"),
    }
}

fn inap_operation_name(op: i64) -> String {
    format!("inap-operation-{op}")
}

/// INAP capability-set level by operation-code range.
fn inap_cs_level(op: i64) -> u8 {
    match op {
        0..=17 => 1,
        18..=26 => 2,
        _ => 3,
    }
}

fn cap_nodes(env: &TcapEnvelope) -> (NodeType, NodeType) {
    // initialDP and charging reports originate at the switch.
    match env.code {
        Some(0) | Some(36) => (NodeType::Ssp, NodeType::Scp),
        Some(_) => (NodeType::Scp, NodeType::Ssp),
        None => (NodeType::Unknown, NodeType::Unknown),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoder impls

#[derive(Debug)]
pub struct MapDecoder {
    kb: Arc<KnowledgeBase>,
}

impl MapDecoder {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl Decoder for MapDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Map
    }

    fn can_decode(&self, packet: &Packet) -> bool {
        if !is_tcap(&packet.payload) {
            return false;
        }
        match parse_envelope(&packet.payload) {
            // Operation codes only discriminate on invoke/returnResult;
            // error components carry error codes, and those dialogues plus
            // aborts stay with MAP, the first registered TCAP decoder.
            Ok(env) => match (env.component, env.code) {
                (
                    Some(ComponentKind::Invoke)
                    | Some(ComponentKind::ReturnResult),
                    Some(op),
                ) => map_category(op).is_some(),
                _ => true,
            },
            Err(_) => false,
        }
    }

    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        decode_tcap_family(Protocol::Map, &self.kb, packet)
    }
}

#[derive(Debug)]
pub struct CapDecoder {
    kb: Arc<KnowledgeBase>,
}

impl CapDecoder {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl Decoder for CapDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Cap
    }

    fn can_decode(&self, packet: &Packet) -> bool {
        if !is_tcap(&packet.payload) {
            return false;
        }
        match parse_envelope(&packet.payload) {
            Ok(env) => match (env.component, env.code) {
                (
                    Some(ComponentKind::Invoke)
                    | Some(ComponentKind::ReturnResult),
                    Some(op),
                ) => CAP_OPS.contains(&op),
                _ => false,
            },
            Err(_) => false,
        }
    }

    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        decode_tcap_family(Protocol::Cap, &self.kb, packet)
    }
}

#[derive(Debug)]
pub struct InapDecoder {
    kb: Arc<KnowledgeBase>,
}

impl InapDecoder {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl Decoder for InapDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Inap
    }

    fn can_decode(&self, packet: &Packet) -> bool {
        // Fallback for whatever TCAP the MAP and CAP claims left over.
        is_tcap(&packet.payload)
    }

    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        decode_tcap_family(Protocol::Inap, &self.kb, packet)
    }
}
