// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Flow reconstruction: match a completed session against the procedure
//! templates and score its conformance.

use chrono::{DateTime, Utc};

use crate::{
    kb::{KnowledgeBase, ProcedureTemplate},
    models::{
        flow::{
            CapturedFlow, DeviationKind, DeviationSeverity, FlowDeviation,
            FlowResult, StepOutcome,
        },
        session::Session,
    },
};

/// A step is late when it exceeds the template timing by this much.
const STEP_LATENCY_LIMIT_MS: i64 = 5_000;

/// Picks the best-matching template and scores the session against it.
///
/// Template selection counts mandatory steps whose `(protocol, message)`
/// pair occurs in the session; ties go to the template with more mandatory
/// steps (the more specific one). A best score below one yields the
/// `Unknown` flow.
pub fn reconstruct(session: &Session, kb: &KnowledgeBase) -> CapturedFlow {
    let template = match detect_procedure(session, kb) {
        Some(t) => t,
        None => return CapturedFlow::unknown(),
    };
    score_against(session, template)
}

fn detect_procedure<'a>(
    session: &Session,
    kb: &'a KnowledgeBase,
) -> Option<&'a ProcedureTemplate> {
    let mut best: Option<(&ProcedureTemplate, usize)> = None;
    for template in kb.all_procedures() {
        let score = template
            .steps
            .iter()
            .filter(|step| step.mandatory)
            .filter(|step| {
                session.messages.iter().any(|m| {
                    m.protocol == step.protocol
                        && m.message_name == step.message
                })
            })
            .count();
        if score == 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, current_score)) => {
                score > current_score
                    || (score == current_score
                        && template.mandatory_count()
                            > current.mandatory_count())
            },
        };
        if better {
            best = Some((template, score));
        }
    }
    best.map(|(t, _)| t)
}

fn score_against(
    session: &Session,
    template: &ProcedureTemplate,
) -> CapturedFlow {
    let mut used = vec![false; session.messages.len()];
    let mut steps: Vec<StepOutcome> = Vec::with_capacity(template.steps.len());
    let mut deviations: Vec<FlowDeviation> = Vec::new();
    let mut prev_matched_at: Option<DateTime<Utc>> = None;

    for step in &template.steps {
        // Earliest unused message matching the expected pair.
        let found = session.messages.iter().enumerate().find(|(i, m)| {
            !used[*i]
                && m.protocol == step.protocol
                && m.message_name == step.message
        });

        match found {
            Some((i, msg)) => {
                used[i] = true;
                let latency_ms = prev_matched_at
                    .map(|prev| (msg.timestamp - prev).num_milliseconds());

                if let Some(lat) = latency_ms {
                    if lat < 0 {
                        deviations.push(FlowDeviation {
                            kind: DeviationKind::OutOfOrder,
                            severity: DeviationSeverity::Major,
                            detail: format!(
                                "step '{}' observed before its predecessor",
                                step.name
                            ),
                        });
                    } else if lat > STEP_LATENCY_LIMIT_MS {
                        deviations.push(FlowDeviation {
                            kind: DeviationKind::Timeout,
                            severity: DeviationSeverity::Major,
                            detail: format!(
                                "step '{}' completed after {lat} ms",
                                step.name
                            ),
                        });
                    }
                }

                steps.push(StepOutcome {
                    step: step.name.clone(),
                    protocol: step.protocol,
                    expected_message: step.message.clone(),
                    mandatory: step.mandatory,
                    matched: Some(msg.id),
                    matched_at: Some(msg.timestamp),
                    latency_ms,
                });
                prev_matched_at = Some(msg.timestamp);
            },
            None => {
                if step.mandatory {
                    deviations.push(FlowDeviation {
                        kind: DeviationKind::MissingStep,
                        severity: DeviationSeverity::Critical,
                        detail: format!(
                            "mandatory step '{}' ({}) never observed",
                            step.name, step.message
                        ),
                    });
                }
                steps.push(StepOutcome {
                    step: step.name.clone(),
                    protocol: step.protocol,
                    expected_message: step.message.clone(),
                    mandatory: step.mandatory,
                    matched: None,
                    matched_at: None,
                    latency_ms: None,
                });
            },
        }
    }

    for (i, msg) in session.messages.iter().enumerate() {
        if !used[i] {
            deviations.push(FlowDeviation {
                kind: DeviationKind::UnexpectedMessage,
                severity: DeviationSeverity::Minor,
                detail: format!(
                    "captured {} '{}' fits no template step",
                    msg.protocol, msg.message_name
                ),
            });
        }
    }

    let total_mandatory = template.mandatory_count();
    let matched_mandatory = steps
        .iter()
        .filter(|s| s.mandatory && s.matched.is_some())
        .count();
    let completeness = if total_mandatory == 0 {
        1.0
    } else {
        matched_mandatory as f64 / total_mandatory as f64
    };

    let critical_missing = deviations
        .iter()
        .filter(|d| d.severity == DeviationSeverity::Critical)
        .count();
    // More than one mandatory step gone means the procedure itself failed,
    // not just the capture of it.
    let result = if completeness >= 0.9 && critical_missing == 0 {
        FlowResult::Success
    } else if completeness < 0.5 || critical_missing >= 2 {
        FlowResult::Failure
    } else {
        FlowResult::Partial
    };

    CapturedFlow {
        procedure: template.name.clone(),
        steps,
        completeness,
        deviations,
        result,
    }
}
