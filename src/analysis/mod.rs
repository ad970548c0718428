// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Rule-driven analysis over decoded messages and rolling statistics.
//!
//! Every decoded message is inspected once. Matches are deduplicated by
//! `(rule, protocol, imsi, code)` inside a 60 second window: a repeat bumps
//! `occurrence_count` on the existing issue instead of producing a new one.
//! The issue history is a bounded ring behind a single mutex, exactly the
//! cheap shared state the rest of the pipeline expects.

pub mod rules;

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::{
    analysis::rules::RuleHit,
    kb::KnowledgeBase,
    models::{
        issue::{Issue, IssueCategory, IssueSeverity},
        message::{Message, MessageResult, Protocol},
    },
    stats::StatsSnapshot,
};

const ISSUE_RING: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    rule_id: &'static str,
    protocol: Protocol,
    imsi: Option<String>,
    code: Option<u32>,
}

#[derive(Debug, Default)]
struct AnalysisState {
    issues: VecDeque<Issue>,
    /// Dedup window: key to (issue id, last detection time).
    window: HashMap<DedupKey, (Uuid, DateTime<Utc>)>,
    /// Failure timestamps per (protocol, code, imsi).
    failures: HashMap<(Protocol, u32, String), VecDeque<DateTime<Utc>>>,
    /// Timeout timestamps per procedure key.
    timeouts: HashMap<String, VecDeque<DateTime<Utc>>>,
}

pub struct AnalysisEngine {
    kb: Arc<KnowledgeBase>,
    state: Mutex<AnalysisState>,
}

impl AnalysisEngine {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self {
            kb,
            state: Mutex::new(AnalysisState::default()),
        }
    }

    /// Evaluates every rule against one decoded message. Returns the issues
    /// newly created by this call (dedup increments return nothing).
    pub fn inspect(
        &self,
        msg: &Message,
        latency_ms: Option<f64>,
        session_imsi: Option<&str>,
        snapshot: &StatsSnapshot,
    ) -> Vec<Issue> {
        let now = msg.timestamp;
        let mut hits: Vec<RuleHit> = Vec::new();

        if let Some(hit) = rules::code_rule(msg, session_imsi) {
            hits.push(hit);
        }
        if let Some(hit) = rules::encapsulated_nas_rule(msg) {
            hits.push(hit);
        }

        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let effective_imsi = msg
            .keys
            .imsi
            .clone()
            .or_else(|| session_imsi.map(str::to_string));
        hits.extend(pattern_hits(
            msg,
            latency_ms,
            effective_imsi,
            snapshot,
            &mut state,
            now,
        ));

        let mut created = Vec::new();
        for hit in hits {
            if let Some(issue) = emit(&self.kb, &mut state, hit, now) {
                created.push(issue);
            }
        }
        created
    }

    /// Number of issues currently held in the ring.
    pub fn issue_count(&self) -> usize {
        self.state.lock().map(|s| s.issues.len()).unwrap_or(0)
    }

    /// Clone of the issue history, newest last.
    pub fn issues(&self) -> Vec<Issue> {
        self.state
            .lock()
            .map(|s| s.issues.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Stats- and window-driven rules.
fn pattern_hits(
    msg: &Message,
    latency_ms: Option<f64>,
    effective_imsi: Option<String>,
    snapshot: &StatsSnapshot,
    state: &mut AnalysisState,
    now: DateTime<Utc>,
) -> Vec<RuleHit> {
    let window = Duration::seconds(rules::PATTERN_WINDOW_SECS);
    let mut hits = Vec::new();

    // HIGH-ERROR-RATE: recent success rate per protocol.
    if let Some(proto) = snapshot.protocol(msg.protocol)
        && proto.recent_total >= rules::HIGH_ERROR_RATE_MIN_SAMPLES
    {
        let rate = proto.recent_success_rate();
        if rate < rules::HIGH_ERROR_RATE_THRESHOLD {
            hits.push(RuleHit {
                rule_id: "HIGH-ERROR-RATE",
                severity: IssueSeverity::Major,
                category: IssueCategory::AbnormalPattern,
                protocol: msg.protocol,
                title: format!("High error rate on {}", msg.protocol),
                description: format!(
                    "success rate {:.1}% over the last {} {} messages",
                    rate * 100.0,
                    proto.recent_total,
                    msg.protocol
                ),
                code: None,
                imsi: None,
            });
        }
    }

    // HIGH-LATENCY: observed latency against the established EMA baseline.
    if let Some(observed) = latency_ms
        && let Some(proc) = snapshot.procedure(&msg.procedure_key())
        && proc.latency_samples >= rules::HIGH_LATENCY_MIN_SAMPLES
        && observed > rules::HIGH_LATENCY_FACTOR * proc.ema_latency_ms
    {
        hits.push(RuleHit {
            rule_id: "HIGH-LATENCY",
            severity: IssueSeverity::Warning,
            category: IssueCategory::Performance,
            protocol: msg.protocol,
            title: format!("Slow {}", msg.message_name),
            description: format!(
                "observed {observed:.0} ms against a {:.0} ms baseline",
                proc.ema_latency_ms
            ),
            code: None,
            imsi: effective_imsi.clone(),
        });
    }

    // REPEATED-FAILURE-SAME-IMSI: sliding window per (protocol, code, imsi).
    if msg.result == MessageResult::Failure
        && let (Some(code), Some(imsi)) = (msg.cause_code, &effective_imsi)
        && !rules::has_dedicated_rule(msg.protocol, code)
    {
        let times = state
            .failures
            .entry((msg.protocol, code, imsi.clone()))
            .or_default();
        times.push_back(now);
        while let Some(front) = times.front() {
            if now - *front > window {
                times.pop_front();
            } else {
                break;
            }
        }
        if times.len() >= rules::REPEATED_FAILURE_COUNT {
            hits.push(RuleHit {
                rule_id: "REPEATED-FAILURE-SAME-IMSI",
                severity: IssueSeverity::Major,
                category: IssueCategory::AbnormalPattern,
                protocol: msg.protocol,
                title: "Repeated failures for one subscriber".to_string(),
                description: format!(
                    "{} failures with cause {} for IMSI {} within {}s",
                    times.len(),
                    code,
                    imsi,
                    rules::PATTERN_WINDOW_SECS
                ),
                code: Some(code),
                imsi: Some(imsi.clone()),
            });
        }
    }

    // TIMEOUT-PATTERN: timeout-classified messages per procedure.
    if msg.result == MessageResult::Timeout {
        let times = state
            .timeouts
            .entry(msg.procedure_key())
            .or_default();
        times.push_back(now);
        while let Some(front) = times.front() {
            if now - *front > window {
                times.pop_front();
            } else {
                break;
            }
        }
        if times.len() > rules::TIMEOUT_PATTERN_COUNT {
            hits.push(RuleHit {
                rule_id: "TIMEOUT-PATTERN",
                severity: IssueSeverity::Major,
                category: IssueCategory::Performance,
                protocol: msg.protocol,
                title: format!("Timeouts piling up on {}", msg.message_name),
                description: format!(
                    "{} timeouts within {}s for {}",
                    times.len(),
                    rules::PATTERN_WINDOW_SECS,
                    msg.procedure_key()
                ),
                code: None,
                imsi: None,
            });
        }
    }

    hits
}

/// Applies dedup, enriches from the KB and stores the issue.
fn emit(
    kb: &KnowledgeBase,
    state: &mut AnalysisState,
    hit: RuleHit,
    now: DateTime<Utc>,
) -> Option<Issue> {
    let key = DedupKey {
        rule_id: hit.rule_id,
        protocol: hit.protocol,
        imsi: hit.imsi.clone(),
        code: hit.code,
    };
    let window = Duration::seconds(rules::PATTERN_WINDOW_SECS);

    if let Some((issue_id, last)) = state.window.get(&key).copied()
        && now - last <= window
    {
        state.window.insert(key, (issue_id, now));
        if let Some(existing) =
            state.issues.iter_mut().rev().find(|i| i.id == issue_id)
        {
            existing.occurrence_count += 1;
            existing.last_detected = now;
        }
        return None;
    }

    let (root_cause, recommendations) = match hit
        .code
        .and_then(|code| kb.error_code(hit.protocol, code))
    {
        Some(entry) => (
            format!("{}: {}", entry.name, entry.description),
            entry.recommendations.clone(),
        ),
        None => (
            format!("No catalog entry for this condition on {}", hit.protocol),
            Vec::new(),
        ),
    };

    let issue = Issue {
        id: Uuid::new_v4(),
        rule_id: hit.rule_id,
        severity: hit.severity,
        category: hit.category,
        protocol: hit.protocol,
        title: hit.title,
        description: hit.description,
        root_cause,
        recommendations,
        imsi: hit.imsi,
        code: hit.code,
        first_detected: now,
        last_detected: now,
        occurrence_count: 1,
    };

    warn!(
        rule = issue.rule_id,
        severity = ?issue.severity,
        imsi = issue.imsi.as_deref().unwrap_or("-"),
        "issue detected: {}",
        issue.title
    );

    state.window.insert(key, (issue.id, now));
    if state.issues.len() == ISSUE_RING {
        state.issues.pop_front();
    }
    state.issues.push_back(issue.clone());
    Some(issue)
}
