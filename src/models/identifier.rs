// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::message::{CorrelationKeys, Message, Protocol};

/// Kinds of identifiers the correlation index is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    Imsi,
    Msisdn,
    Imei,
    Supi,
    Teid,
    Seid,
    DiameterSessionId,
    AmfUeId,
    RanUeId,
    MmeUeId,
    EnbUeId,
    UeIp,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::Imsi => "imsi",
            IdentifierType::Msisdn => "msisdn",
            IdentifierType::Imei => "imei",
            IdentifierType::Supi => "supi",
            IdentifierType::Teid => "teid",
            IdentifierType::Seid => "seid",
            IdentifierType::DiameterSessionId => "diameter_session_id",
            IdentifierType::AmfUeId => "amf_ue_id",
            IdentifierType::RanUeId => "ran_ue_id",
            IdentifierType::MmeUeId => "mme_ue_id",
            IdentifierType::EnbUeId => "enb_ue_id",
            IdentifierType::UeIp => "ue_ip",
        }
    }
}

/// `(type, value)` pair, unique across all active sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierKey {
    pub kind: IdentifierType,
    pub value: String,
}

impl IdentifierKey {
    pub fn new(kind: IdentifierType, value: impl Into<String>) -> Self {
        Self { kind, value: value.into() }
    }
}

/// An identifier bound to a session, with provenance and confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierBinding {
    pub key: IdentifierKey,
    pub protocol: Protocol,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// 1.0 when extracted directly, 0.95 when inherited across protocols.
    pub confidence: f64,
}

/// Collects the `(type, value)` identifiers a message carries, in the order
/// the correlation engine evaluates them.
pub fn identifiers_of(msg: &Message) -> Vec<IdentifierKey> {
    let k: &CorrelationKeys = &msg.keys;
    let mut out = Vec::new();

    let mut push_str = |kind: IdentifierType, v: &Option<String>| {
        if let Some(v) = v
            && !v.is_empty()
        {
            out.push(IdentifierKey::new(kind, v.clone()));
        }
    };

    push_str(IdentifierType::Imsi, &k.imsi);
    push_str(IdentifierType::Msisdn, &k.msisdn);
    push_str(IdentifierType::Imei, &k.imei);
    push_str(IdentifierType::Supi, &k.supi);
    push_str(IdentifierType::DiameterSessionId, &k.diameter_session_id);
    push_str(IdentifierType::UeIp, &k.ue_ip);

    if let Some(teid) = k.teid {
        out.push(IdentifierKey::new(IdentifierType::Teid, teid.to_string()));
    }
    if let Some(seid) = k.seid {
        out.push(IdentifierKey::new(IdentifierType::Seid, seid.to_string()));
    }
    if let Some(v) = k.amf_ue_id {
        out.push(IdentifierKey::new(IdentifierType::AmfUeId, v.to_string()));
    }
    if let Some(v) = k.ran_ue_id {
        out.push(IdentifierKey::new(IdentifierType::RanUeId, v.to_string()));
    }
    if let Some(v) = k.mme_ue_id {
        out.push(IdentifierKey::new(IdentifierType::MmeUeId, v.to_string()));
    }
    if let Some(v) = k.enb_ue_id {
        out.push(IdentifierKey::new(IdentifierType::EnbUeId, v.to_string()));
    }

    out
}
