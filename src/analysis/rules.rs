// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The fixed detection rule set.
//!
//! Code-triggered rules fire straight off a message's cause code; the
//! pattern rules look at the statistics snapshot and the engine's sliding
//! windows. Each hit names the KB code used to enrich the resulting issue.

use crate::models::{
    issue::{IssueCategory, IssueSeverity},
    message::{Message, Protocol},
};

/// One rule match, before dedup and KB enrichment.
#[derive(Debug, Clone)]
pub struct RuleHit {
    pub rule_id: &'static str,
    pub severity: IssueSeverity,
    pub category: IssueCategory,
    pub protocol: Protocol,
    pub title: String,
    pub description: String,
    /// Code used for the KB lookup and dedup key.
    pub code: Option<u32>,
    pub imsi: Option<String>,
}

/// Cause codes already covered by a dedicated rule, per protocol. The
/// repeated-failure pattern rule skips these so one failure storm does not
/// produce two parallel issues for the same root cause.
pub fn has_dedicated_rule(protocol: Protocol, code: u32) -> bool {
    matches!(
        (protocol, code),
        (Protocol::Diameter, 5001 | 5004 | 5012 | 4181)
            | (Protocol::Gtpv2, 64 | 67 | 73 | 91)
            | (Protocol::Map, 1 | 34)
            | (Protocol::Nas, 11)
    )
}

/// Cause-code rules of the required rule table. `fallback_imsi` is the
/// session-bound identity for answers that do not repeat the IMSI.
pub fn code_rule(msg: &Message, fallback_imsi: Option<&str>) -> Option<RuleHit> {
    let code = msg.cause_code?;
    let imsi = msg
        .keys
        .imsi
        .clone()
        .or_else(|| fallback_imsi.map(str::to_string));

    let hit = |rule_id: &'static str,
               severity: IssueSeverity,
               category: IssueCategory,
               title: &str,
               normalized_code: u32| {
        RuleHit {
            rule_id,
            severity,
            category,
            protocol: msg.protocol,
            title: title.to_string(),
            description: format!(
                "{} reported cause {} in {}",
                msg.protocol, code, msg.message_name
            ),
            code: Some(normalized_code),
            imsi: imsi.clone(),
        }
    };

    match (msg.protocol, code) {
        (Protocol::Diameter, 5001) => Some(hit(
            "DIAM-5001",
            IssueSeverity::Major,
            IssueCategory::ProtocolError,
            "Subscriber unknown in HSS",
            5001,
        )),
        (Protocol::Diameter, 5004) => Some(hit(
            "DIAM-5004",
            IssueSeverity::Major,
            IssueCategory::ProtocolError,
            "Roaming not allowed",
            5004,
        )),
        (Protocol::Diameter, 5012) => Some(hit(
            "DIAM-5012",
            IssueSeverity::Major,
            IssueCategory::ProtocolError,
            "RAT not allowed for subscription",
            5012,
        )),
        (Protocol::Diameter, 4181) => Some(hit(
            "DIAM-4181",
            IssueSeverity::Critical,
            IssueCategory::ProtocolError,
            "Authentication data unavailable",
            4181,
        )),
        (Protocol::Gtpv2, 64) => Some(hit(
            "GTP-CTX-NOT-FOUND",
            IssueSeverity::Major,
            IssueCategory::ProtocolError,
            "GTP context not found",
            64,
        )),
        // 91 is a vendor alias for 73; both report as one rule.
        (Protocol::Gtpv2, 73 | 91) => Some(hit(
            "GTP-NO-RESOURCES",
            IssueSeverity::Critical,
            IssueCategory::Performance,
            "Gateway out of resources",
            73,
        )),
        (Protocol::Gtpv2, 67) => Some(hit(
            "GTP-MISSING-APN",
            IssueSeverity::Major,
            IssueCategory::ConfigIssue,
            "APN not recognised",
            67,
        )),
        (Protocol::Map, 1) => Some(hit(
            "MAP-UNKNOWN-SUBSCRIBER",
            IssueSeverity::Major,
            IssueCategory::ProtocolError,
            "Unknown subscriber in HLR",
            1,
        )),
        (Protocol::Map, 34) => Some(hit(
            "MAP-SYSTEM-FAILURE",
            IssueSeverity::Critical,
            IssueCategory::ProtocolError,
            "MAP system failure",
            34,
        )),
        (Protocol::Nas, 11) => Some(hit(
            "NAS-PLMN-NOT-ALLOWED",
            IssueSeverity::Major,
            IssueCategory::ProtocolError,
            "PLMN not allowed",
            11,
        )),
        _ => None,
    }
}

/// NAS causes travel inside S1AP/NGAP messages too; surface EMM cause 11
/// from the encapsulating message as the NAS rule.
pub fn encapsulated_nas_rule(msg: &Message) -> Option<RuleHit> {
    if !matches!(msg.protocol, Protocol::S1ap | Protocol::Ngap) {
        return None;
    }
    let cause = msg.details.get("nas_cause").and_then(|v| v.as_u64())?;
    if cause != 11 {
        return None;
    }
    Some(RuleHit {
        rule_id: "NAS-PLMN-NOT-ALLOWED",
        severity: IssueSeverity::Major,
        category: IssueCategory::ProtocolError,
        protocol: Protocol::Nas,
        title: "PLMN not allowed".to_string(),
        description: format!(
            "EMM cause 11 carried inside {} {}",
            msg.protocol, msg.message_name
        ),
        code: Some(11),
        imsi: msg.keys.imsi.clone(),
    })
}

// Pattern-rule thresholds.
pub const HIGH_ERROR_RATE_MIN_SAMPLES: usize = 100;
pub const HIGH_ERROR_RATE_THRESHOLD: f64 = 0.95;
pub const HIGH_LATENCY_MIN_SAMPLES: u64 = 50;
pub const HIGH_LATENCY_FACTOR: f64 = 2.0;
pub const REPEATED_FAILURE_COUNT: usize = 3;
pub const TIMEOUT_PATTERN_COUNT: usize = 5;
pub const PATTERN_WINDOW_SECS: i64 = 60;
