// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Analysis rules over the decoded stream: KB enrichment, dedup windows and
//! the pattern rules.

use sigmon_rs::models::issue::{IssueCategory, IssueSeverity};

use super::common::{
    Harness, IMSI, diameter_packet, map_error_packet, ts,
};

#[test]
fn unknown_subscriber_answer_raises_diam_5001() {
    let harness = Harness::new();
    harness.feed(&diameter_packet(
        316,
        true,
        "mme01;s2;1",
        Some(IMSI),
        None,
        ts(0),
    ));
    let (_, _, issues) = harness.feed(&diameter_packet(
        316,
        false,
        "mme01;s2;1",
        None,
        Some(5001),
        ts(1),
    ));

    assert_eq!(issues.len(), 1);
    let issue = &issues[0];
    assert_eq!(issue.rule_id, "DIAM-5001");
    assert_eq!(issue.severity, IssueSeverity::Major);
    assert_eq!(issue.category, IssueCategory::ProtocolError);
    // The answer itself has no User-Name; the session supplies the IMSI.
    assert_eq!(issue.imsi.as_deref(), Some(IMSI));
    assert!(issue.root_cause.contains("DIAMETER_ERROR_USER_UNKNOWN"));
    assert!(!issue.recommendations.is_empty());

    // A permanent failure answer also closes the session as failed.
    let closed = harness.closed_sessions();
    assert_eq!(closed.len(), 1);
    assert!(closed[0].session.metrics.error_count > 0);
}

#[test]
fn repeated_map_failures_dedup_into_one_issue() {
    let harness = Harness::new();
    let mut created = 0usize;
    for i in 0..5 {
        let (_, _, issues) =
            harness.feed(&map_error_packet(34, ts(i * 5)));
        created += issues.len();
    }

    // First message created the issue, four repeats only bumped it.
    assert_eq!(created, 1);
    let issues = harness.analysis.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].rule_id, "MAP-SYSTEM-FAILURE");
    assert_eq!(issues[0].severity, IssueSeverity::Critical);
    assert_eq!(issues[0].imsi.as_deref(), Some(IMSI));
    assert_eq!(issues[0].occurrence_count, 5);
    assert!(issues[0].last_detected > issues[0].first_detected);
}

#[test]
fn dedup_window_expires_after_sixty_seconds() {
    let harness = Harness::new();
    harness.feed(&map_error_packet(34, ts(0)));
    // 90 seconds later the window has passed and a fresh issue appears.
    let (_, _, issues) = harness.feed(&map_error_packet(34, ts(90)));
    assert_eq!(issues.len(), 1);
    assert_eq!(harness.analysis.issue_count(), 2);
}

#[test]
fn gtp_resource_alias_maps_to_73() {
    use super::common::{gtp_packet, gtpv2_msg, ie_v2};

    let harness = Harness::new();
    let rejected = gtpv2_msg(33, 0x99, 1, &[ie_v2(2, &[91, 0])]);
    let (_, _, issues) = harness.feed(&gtp_packet(rejected, false, ts(0)));

    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].rule_id, "GTP-NO-RESOURCES");
    assert_eq!(issues[0].severity, IssueSeverity::Critical);
    assert_eq!(issues[0].category, IssueCategory::Performance);
    // The alias is normalized onto the canonical code.
    assert_eq!(issues[0].code, Some(73));
}

#[test]
fn high_error_rate_needs_a_full_window() {
    use super::common::{gtp_packet, gtpv2_msg, ie_v2};

    let harness = Harness::new();
    let mut rule_seen = false;
    for i in 0..120 {
        let rejected =
            gtpv2_msg(33, 0x100 + i, i, &[ie_v2(2, &[94, 0])]);
        let (_, _, issues) =
            harness.feed(&gtp_packet(rejected, false, ts(i as i64)));
        rule_seen |= issues
            .iter()
            .any(|issue| issue.rule_id == "HIGH-ERROR-RATE");
    }
    assert!(rule_seen, "sustained failures must trip the rate rule");
}
