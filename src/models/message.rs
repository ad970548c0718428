// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The uniform decoded record every protocol decoder produces.
//!
//! A [`Message`] is immutable once built: the decoder fills it through
//! [`MessageBuilder`], after that correlation, analysis and the writers only
//! ever read it (they share it behind an `Arc`). Identifier slots live in
//! [`CorrelationKeys`]; everything protocol specific that has no dedicated
//! slot goes into the free-form `details` map.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::packet::FiveTuple;

/// Signaling protocols understood by the decoder registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Map,
    Cap,
    Inap,
    Diameter,
    Gtpv1,
    Gtpv2,
    Pfcp,
    Http2,
    Ngap,
    S1ap,
    Nas,
}

impl Protocol {
    pub const ALL: [Protocol; 11] = [
        Protocol::Map,
        Protocol::Cap,
        Protocol::Inap,
        Protocol::Diameter,
        Protocol::Gtpv1,
        Protocol::Gtpv2,
        Protocol::Pfcp,
        Protocol::Http2,
        Protocol::Ngap,
        Protocol::S1ap,
        Protocol::Nas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Map => "map",
            Protocol::Cap => "cap",
            Protocol::Inap => "inap",
            Protocol::Diameter => "diameter",
            Protocol::Gtpv1 => "gtpv1",
            Protocol::Gtpv2 => "gtpv2",
            Protocol::Pfcp => "pfcp",
            Protocol::Http2 => "http2",
            Protocol::Ngap => "ngap",
            Protocol::S1ap => "s1ap",
            Protocol::Nas => "nas",
        }
    }

    /// Stable dense index, used by the per-protocol statistics tables.
    pub fn index(&self) -> usize {
        Protocol::ALL
            .iter()
            .position(|p| p == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/response orientation of a decoded message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
    #[default]
    Unknown,
}

/// Outcome classification of a decoded message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageResult {
    Success,
    Failure,
    Timeout,
    #[default]
    Unknown,
}

/// Network function role inferred from the message type and direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeType {
    Mme,
    Hss,
    Sgw,
    Pgw,
    Sgsn,
    Ggsn,
    Amf,
    Smf,
    Upf,
    Gnb,
    Enb,
    Msc,
    Vlr,
    Hlr,
    Ssp,
    Scp,
    Udm,
    #[default]
    Unknown,
}

/// One side of a decoded message: inferred node role plus the packet
/// coordinates it was captured with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: NodeType,
    pub ip: std::net::IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(node: NodeType, ip: std::net::IpAddr, port: u16) -> Self {
        Self { node, ip, port }
    }
}

/// Every correlation identifier slot a decoder may fill.
///
/// All slots are optional; correlation reasons about whichever subset is
/// present. Values keep their canonical textual form (digits for IMSI and
/// MSISDN, dotted labels for APN) so they can be indexed directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationKeys {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msisdn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plmn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dnn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seid: Option<u64>,
    #[serde(
        rename = "session_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub diameter_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_num: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amf_ue_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ran_ue_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mme_ue_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enb_ue_id: Option<u32>,
    /// Subscriber (UE) IP learned from a payload IE, never the node address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ue_ip: Option<String>,
}

impl CorrelationKeys {
    pub fn is_empty(&self) -> bool {
        self.imsi.is_none()
            && self.msisdn.is_none()
            && self.imei.is_none()
            && self.supi.is_none()
            && self.teid.is_none()
            && self.seid.is_none()
            && self.diameter_session_id.is_none()
            && self.amf_ue_id.is_none()
            && self.ran_ue_id.is_none()
            && self.mme_ue_id.is_none()
            && self.enb_ue_id.is_none()
            && self.ue_ip.is_none()
    }
}

/// Uniform decoded record produced by every decoder.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub protocol: Protocol,
    pub message_type: u32,
    pub message_name: String,
    pub direction: Direction,
    pub result: MessageResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause_code: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause_text: Option<String>,
    pub source: Endpoint,
    pub destination: Endpoint,
    #[serde(flatten)]
    pub keys: CorrelationKeys,
    pub payload_size: usize,
    pub decode_time_us: u64,
    pub details: Map<String, Value>,
    /// Raw L4 payload; kept for drill-down, never serialized into events.
    #[serde(skip)]
    pub raw: Bytes,
}

impl Message {
    pub fn builder(protocol: Protocol) -> MessageBuilder {
        MessageBuilder::new(protocol)
    }

    pub fn is_failure(&self) -> bool {
        self.result == MessageResult::Failure
    }

    /// Procedure key used by statistics and the flow reconstructor.
    pub fn procedure_key(&self) -> String {
        format!("{}/{}", self.protocol, self.message_name)
    }
}

/// Builder for [`Message`].
///
/// Decoders fill the slots they understand and call [`MessageBuilder::build`]
/// with the packet metadata; identity, timestamps and payload accounting are
/// applied there so no decoder can get them wrong.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    protocol: Option<Protocol>,
    message_type: u32,
    message_name: String,
    direction: Direction,
    result: MessageResult,
    cause_code: Option<u32>,
    cause_text: Option<String>,
    src_node: NodeType,
    dst_node: NodeType,
    keys: CorrelationKeys,
    details: Map<String, Value>,
}

impl MessageBuilder {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol: Some(protocol),
            ..Default::default()
        }
    }

    pub fn message_type(mut self, mt: u32) -> Self {
        self.message_type = mt;
        self
    }

    pub fn message_name(mut self, name: impl Into<String>) -> Self {
        self.message_name = name.into();
        self
    }

    pub fn direction(mut self, d: Direction) -> Self {
        self.direction = d;
        self
    }

    pub fn result(mut self, r: MessageResult) -> Self {
        self.result = r;
        self
    }

    pub fn cause(mut self, code: u32, text: Option<String>) -> Self {
        self.cause_code = Some(code);
        self.cause_text = text;
        self
    }

    pub fn nodes(mut self, src: NodeType, dst: NodeType) -> Self {
        self.src_node = src;
        self.dst_node = dst;
        self
    }

    pub fn keys(mut self, keys: CorrelationKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn keys_mut(&mut self) -> &mut CorrelationKeys {
        &mut self.keys
    }

    pub fn detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn details_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.details
    }

    /// Finalize with the capture metadata. The timestamp is the capture time
    /// verbatim and the payload size is the raw payload length.
    pub fn build(
        self,
        raw: Bytes,
        five_tuple: &FiveTuple,
        capture_time: DateTime<Utc>,
        decode_time_us: u64,
    ) -> Message {
        Message {
            id: Uuid::new_v4(),
            timestamp: capture_time,
            protocol: self.protocol.unwrap_or(Protocol::Nas),
            message_type: self.message_type,
            message_name: self.message_name,
            direction: self.direction,
            result: self.result,
            cause_code: self.cause_code,
            cause_text: self.cause_text,
            source: Endpoint::new(
                self.src_node,
                five_tuple.src_ip,
                five_tuple.src_port,
            ),
            destination: Endpoint::new(
                self.dst_node,
                five_tuple.dst_ip,
                five_tuple.dst_port,
            ),
            keys: self.keys,
            payload_size: raw.len(),
            decode_time_us,
            details: self.details,
            raw,
        }
    }
}
