// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session create/join/merge behavior of the correlation engine.

use sigmon_rs::models::{
    identifier::{IdentifierKey, IdentifierType},
    session::SessionStatus,
};

use super::common::{
    Harness, IMSI, diameter_packet, fteid_value, gtp_packet, gtpv2_msg, ie_v2,
    imsi_ie, ts,
};

#[test]
fn cross_protocol_merge_keeps_the_older_session() {
    let harness = Harness::new();
    let teid: u32 = 0xB0B0;

    // Session A: Diameter request carrying the IMSI.
    let (_, a, _) = harness.feed(&diameter_packet(
        316,
        true,
        "mme01;ulr;9",
        Some(IMSI),
        None,
        ts(0),
    ));

    // Session B: GTP Create Session with a TEID but no IMSI.
    let csr = gtpv2_msg(
        32,
        0,
        0x10,
        &[ie_v2(87, &fteid_value(teid, [10, 0, 0, 9]))],
    );
    let (_, b, _) = harness.feed(&gtp_packet(csr, true, ts(1)));
    assert_ne!(a.session_id, b.session_id);
    assert_eq!(harness.correlation.active_sessions(), 2);

    // Modify Bearer carries both identifiers and forces the merge.
    let mbr = gtpv2_msg(34, teid, 0x11, &[imsi_ie()]);
    let (_, merged, _) = harness.feed(&gtp_packet(mbr, true, ts(2)));

    // Deterministic survivor: the smallest session id.
    assert_eq!(merged.session_id, a.session_id.min(b.session_id));
    assert_eq!(harness.correlation.active_sessions(), 1);

    let (message_count, ordered, audit) = harness
        .correlation
        .with_session(merged.session_id, |s| {
            let times: Vec<_> = s.messages.iter().map(|m| m.timestamp).collect();
            (
                s.messages.len(),
                times.windows(2).all(|w| w[0] <= w[1]),
                s.merge_audit.len(),
            )
        })
        .expect("survivor exists");
    assert_eq!(message_count, 3);
    assert!(ordered, "messages interleave in timestamp order");
    assert_eq!(audit, 1);

    // Both identifiers now point at the survivor.
    for key in [
        IdentifierKey::new(IdentifierType::Imsi, IMSI),
        IdentifierKey::new(IdentifierType::Teid, teid.to_string()),
    ] {
        assert_eq!(
            harness.correlation.session_id_for(&key),
            Some(merged.session_id)
        );
    }
}

#[test]
fn terminal_message_completes_the_session() {
    let harness = Harness::new();
    let teid = 0xAB01;

    let csr = gtpv2_msg(
        32,
        0,
        0x20,
        &[imsi_ie(), ie_v2(87, &fteid_value(teid, [10, 0, 0, 9]))],
    );
    harness.feed(&gtp_packet(csr, true, ts(0)));

    let dsr = gtpv2_msg(36, teid, 0x21, &[]);
    harness.feed(&gtp_packet(dsr, true, ts(1)));

    // Delete Session Response closes the session.
    let dsresp = gtpv2_msg(37, teid, 0x21, &[ie_v2(2, &[16, 0])]);
    harness.feed(&gtp_packet(dsresp, false, ts(2)));

    assert_eq!(harness.correlation.active_sessions(), 0);
    let closed = harness.closed_sessions();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].session.status, SessionStatus::Completed);
    assert_eq!(closed[0].session.messages.len(), 3);

    // Property: a completed session never receives another message.
    let late = gtpv2_msg(34, teid, 0x22, &[]);
    let (_, observed, _) = harness.feed(&gtp_packet(late, true, ts(3)));
    assert_ne!(observed.session_id, closed[0].session.id);
}

#[test]
fn response_latency_is_observed() {
    let harness = Harness::new();
    let (_, _, _) = harness.feed(&diameter_packet(
        316,
        true,
        "mme01;lat;1",
        Some(IMSI),
        None,
        ts(0),
    ));
    let (_, observed, _) = harness.feed(&diameter_packet(
        316,
        false,
        "mme01;lat;1",
        None,
        Some(2001),
        ts(2),
    ));
    assert_eq!(observed.latency_ms, Some(2000.0));

    let snapshot = harness.stats.snapshot();
    let proc = snapshot
        .procedure("diameter/Update-Location-Answer")
        .expect("latency recorded");
    assert_eq!(proc.latency_samples, 1);
    assert!((proc.ema_latency_ms - 2000.0).abs() < f64::EPSILON);
}

#[test]
fn expiry_flushes_like_completion() {
    let harness = Harness::new();
    harness.feed(&diameter_packet(
        318,
        true,
        "mme01;exp;1",
        Some(IMSI),
        None,
        ts(0),
    ));
    assert_eq!(harness.correlation.sweep(ts(100)), 0);
    assert_eq!(harness.correlation.sweep(ts(400)), 1);

    let closed = harness.closed_sessions();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].session.status, SessionStatus::Expired);
    assert_eq!(harness.correlation.active_sessions(), 0);
}
