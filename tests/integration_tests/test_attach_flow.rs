// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! End-to-end 4G attach scenarios through decode, correlation and flow
//! reconstruction.

use sigmon_rs::models::flow::{DeviationKind, DeviationSeverity, FlowResult};

use super::common::{Harness, attach_packets, cdr_columns_check, IMSI};
use sigmon_rs::output::cdr_row;

#[test]
fn successful_attach_builds_one_perfect_session() {
    let harness = Harness::new();
    let mut session_ids = Vec::new();
    for pkt in attach_packets() {
        let (_, observed, _) = harness.feed(&pkt);
        session_ids.push(observed.session_id);
    }

    // Every message landed in the same session.
    session_ids.dedup();
    assert_eq!(session_ids.len(), 1, "got sessions {session_ids:?}");
    assert_eq!(harness.correlation.active_sessions(), 1);

    harness.correlation.flush_all();
    let closed = harness.closed_sessions();
    assert_eq!(closed.len(), 1);
    let closed = &closed[0];

    assert_eq!(closed.session.messages.len(), 13);
    assert_eq!(closed.flow.procedure, "4G Attach Procedure");
    assert_eq!(closed.flow.completeness, 1.0);
    assert_eq!(closed.flow.result, FlowResult::Success);
    assert!(closed.flow.deviations.is_empty());

    // Timestamps are non-decreasing through the whole session.
    let times: Vec<_> =
        closed.session.messages.iter().map(|m| m.timestamp).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));

    let row = cdr_row(closed);
    cdr_columns_check(&row);
    assert_eq!(row[1], IMSI);
    assert_eq!(row[3], "4G Attach Procedure");
    assert_eq!(row[7], "success");
}

#[test]
fn missing_bearer_setup_scores_failure() {
    let harness = Harness::new();
    let packets = attach_packets();
    // Steps 1 through 6, then 10 through 13: the Update-Location-Answer and
    // the whole Create Session exchange never arrive.
    for (i, pkt) in packets.iter().enumerate() {
        if (6..9).contains(&i) {
            continue;
        }
        harness.feed(pkt);
    }

    // Let the idle sweep expire the session well past its timeout.
    let expired = harness
        .correlation
        .sweep(super::common::ts(1000));
    assert_eq!(expired, 1);

    let closed = harness.closed_sessions();
    assert_eq!(closed.len(), 1);
    let flow = &closed[0].flow;

    assert_eq!(flow.procedure, "4G Attach Procedure");
    assert!(flow.completeness <= 0.7, "completeness {}", flow.completeness);
    assert_eq!(flow.result, FlowResult::Failure);

    let critical: Vec<_> = flow
        .deviations
        .iter()
        .filter(|d| {
            d.kind == DeviationKind::MissingStep
                && d.severity == DeviationSeverity::Critical
        })
        .collect();
    assert_eq!(critical.len(), 2, "got {:?}", flow.deviations);

    let row = cdr_row(&closed[0]);
    assert_eq!(row[7], "failure");
}

#[test]
fn identifier_index_points_at_the_live_session() {
    use sigmon_rs::models::identifier::{IdentifierKey, IdentifierType};

    let harness = Harness::new();
    let mut last_session = 0;
    for pkt in attach_packets() {
        let (_, observed, _) = harness.feed(&pkt);
        last_session = observed.session_id;
    }

    for key in [
        IdentifierKey::new(IdentifierType::Imsi, IMSI),
        IdentifierKey::new(IdentifierType::Teid, 0xC0FFEEu32.to_string()),
        IdentifierKey::new(
            IdentifierType::DiameterSessionId,
            "mme01;ulr;1",
        ),
    ] {
        assert_eq!(
            harness.correlation.session_id_for(&key),
            Some(last_session),
            "index must map {key:?} to the session"
        );
    }

    // Closing clears the index; a fresh message starts a fresh session.
    harness.correlation.flush_all();
    let (_, observed, _) =
        harness.feed(&attach_packets()[0]);
    assert_ne!(observed.session_id, last_session);
}
