// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::Protocol;

/// Overall verdict of a reconstructed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowResult {
    Success,
    Partial,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviationSeverity {
    Critical,
    Major,
    Minor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationKind {
    MissingStep,
    OutOfOrder,
    Timeout,
    UnexpectedMessage,
}

/// A single conformance deviation found while matching a session against a
/// procedure template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDeviation {
    pub kind: DeviationKind,
    pub severity: DeviationSeverity,
    pub detail: String,
}

/// Outcome of one template step: either the matched captured message or the
/// explicit missing marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub protocol: Protocol,
    pub expected_message: String,
    pub mandatory: bool,
    /// Id of the captured message matched to this step, if any.
    pub matched: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_at: Option<DateTime<Utc>>,
    /// Delay from the previously matched step, milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
}

impl StepOutcome {
    pub fn is_missing_mandatory(&self) -> bool {
        self.mandatory && self.matched.is_none()
    }
}

/// The product of the flow reconstructor for one completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedFlow {
    pub procedure: String,
    pub steps: Vec<StepOutcome>,
    /// matched mandatory steps / total mandatory steps, in [0, 1].
    pub completeness: f64,
    pub deviations: Vec<FlowDeviation>,
    pub result: FlowResult,
}

impl CapturedFlow {
    /// Flow emitted when no template scored a single mandatory hit.
    pub fn unknown() -> Self {
        Self {
            procedure: "Unknown".to_string(),
            steps: Vec::new(),
            completeness: 0.0,
            deviations: Vec::new(),
            result: FlowResult::Partial,
        }
    }
}
