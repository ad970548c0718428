// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Critical,
    Major,
    Minor,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    ProtocolError,
    Timeout,
    AbnormalPattern,
    ConfigIssue,
    Performance,
}

/// A detected problem, enriched from the knowledge base.
///
/// Issues are deduplicated by `(rule_id, imsi, code)` inside a 60 second
/// window; repeats bump `occurrence_count` and `last_detected` instead of
/// producing a new record.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub id: Uuid,
    pub rule_id: &'static str,
    pub severity: IssueSeverity,
    pub category: IssueCategory,
    pub protocol: Protocol,
    pub title: String,
    pub description: String,
    pub root_cause: String,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
    pub occurrence_count: u64,
}
