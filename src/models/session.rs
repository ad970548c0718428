// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Correlated end-to-end subscriber session state.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    identifier::{IdentifierBinding, IdentifierKey},
    message::{Message, MessageResult, Protocol},
};

/// Lifecycle of a session. Transitions are monotone: `Active` may move to
/// `Completed` or `Expired`, terminal states never change again.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// Coarse classification of what the session carries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Voice,
    Data,
    Sms,
    LocationUpdate,
    Registration,
    Handover,
    #[default]
    Unknown,
}

/// One observed location report inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub timestamp: DateTime<Utc>,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mnc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lac: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tac: Option<u32>,
}

/// Byte counters and quality metrics derived while the session is active.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub bytes_uplink: u64,
    pub bytes_downlink: u64,
    pub error_count: u64,
    pub response_count: u64,
    /// Sum of request-to-response latencies, microseconds.
    pub latency_total_us: u64,
}

impl SessionMetrics {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.response_count == 0 {
            return 0.0;
        }
        self.latency_total_us as f64 / self.response_count as f64 / 1000.0
    }
}

/// A correlated session: the exclusive owner of its message list, identifier
/// bindings and location history. The correlation index refers to sessions
/// only by id.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
    pub kind: SessionKind,
    pub identifiers: HashMap<IdentifierKey, IdentifierBinding>,
    pub messages: Vec<Arc<Message>>,
    pub locations: Vec<LocationUpdate>,
    pub metrics: SessionMetrics,
    /// Audit notes recorded when other sessions were folded into this one.
    pub merge_audit: Vec<String>,
    /// Best-matching procedure name, filled by the flow reconstructor.
    pub procedure: Option<String>,
}

impl Session {
    pub fn new(id: u64, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            start_time,
            last_activity: start_time,
            status: SessionStatus::Active,
            kind: SessionKind::Unknown,
            identifiers: HashMap::new(),
            messages: Vec::new(),
            locations: Vec::new(),
            metrics: SessionMetrics::default(),
            merge_audit: Vec::new(),
            procedure: None,
        }
    }

    /// Appends a message, keeping `last_activity` current. Callers must not
    /// append to terminal sessions; the engine enforces that.
    pub fn append(&mut self, msg: Arc<Message>) {
        if msg.timestamp > self.last_activity {
            self.last_activity = msg.timestamp;
        }
        if msg.timestamp < self.start_time {
            self.start_time = msg.timestamp;
        }
        if self.kind == SessionKind::Unknown {
            self.kind = classify_kind(&msg);
        }
        if msg.is_failure() {
            self.metrics.error_count += 1;
        }
        self.messages.push(msg);
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.messages.len() as f64;
        if total == 0.0 {
            return 1.0;
        }
        (total - self.metrics.error_count as f64) / total
    }

    pub fn duration_ms(&self) -> i64 {
        (self.last_activity - self.start_time).num_milliseconds()
    }

    /// Deterministic textual id used by CDRs and the persistence schema.
    pub fn external_id(&self) -> String {
        format!("sess-{:016x}", self.id)
    }

    /// Last failure cause observed, for the CDR `cause` column.
    pub fn last_cause(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.result == MessageResult::Failure)
            .and_then(|m| {
                m.cause_text
                    .clone()
                    .or_else(|| m.cause_code.map(|c| c.to_string()))
            })
    }

    /// First value of an identifier kind, if any message bound one.
    pub fn first_identifier(
        &self,
        kind: crate::models::identifier::IdentifierType,
    ) -> Option<&str> {
        self.identifiers
            .keys()
            .find(|k| k.kind == kind)
            .map(|k| k.value.as_str())
    }
}

fn classify_kind(msg: &Message) -> SessionKind {
    match msg.protocol {
        Protocol::Gtpv1 | Protocol::Gtpv2 | Protocol::Pfcp => SessionKind::Data,
        Protocol::Cap | Protocol::Inap => SessionKind::Voice,
        Protocol::Map => {
            let name = msg.message_name.to_ascii_lowercase();
            if name.contains("sm") && !name.contains("smsc") {
                SessionKind::Sms
            } else {
                SessionKind::LocationUpdate
            }
        },
        Protocol::Nas | Protocol::Ngap | Protocol::S1ap => {
            let name = msg.message_name.to_ascii_lowercase();
            if name.contains("handover") {
                SessionKind::Handover
            } else {
                SessionKind::Registration
            }
        },
        Protocol::Diameter | Protocol::Http2 => SessionKind::Registration,
    }
}
