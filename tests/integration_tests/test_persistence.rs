// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Correlation persistence into the SQL schema.

use std::{sync::Arc, time::Duration};

use rusqlite::Connection;
use serial_test::serial;
use sigmon_rs::{output::persistence, stats::Statistics};

use super::common::{Harness, IMSI, attach_packets};

fn wait_for_row(conn: &Connection, query: &str) -> i64 {
    for _ in 0..50 {
        let count: i64 = conn
            .query_row(query, [], |row| row.get(0))
            .unwrap_or(0);
        if count > 0 {
            return count;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    0
}

#[test]
#[serial]
fn completed_session_lands_in_all_tables() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("sigmon.db");
    let stats = Arc::new(Statistics::new());
    let handle =
        persistence::spawn(&db_path, 100, stats).expect("spawn persistence");

    let harness = Harness::new();
    for pkt in attach_packets() {
        harness.feed(&pkt);
    }
    harness.correlation.flush_all();
    let closed = harness.closed_sessions().remove(0);
    let session_id = closed.session.external_id();
    handle.submit(Arc::new(closed));

    let conn = Connection::open(&db_path).expect("open db");
    assert_eq!(
        wait_for_row(&conn, "SELECT COUNT(*) FROM correlation_sessions"),
        1
    );

    let (status, teid, diameter_sid): (String, Option<String>, Option<String>) =
        conn.query_row(
            "SELECT status, gtp_teid, diameter_session_id
             FROM correlation_sessions WHERE id = ?1",
            [&session_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .expect("session row");
    assert_eq!(status, "completed");
    assert_eq!(teid.as_deref(), Some("12648430"));
    assert!(diameter_sid.is_some());

    let identifiers: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM correlation_identifiers
             WHERE session_id = ?1 AND identifier_type = 'imsi'
             AND identifier_value = ?2",
            [&session_id, &IMSI.to_string()],
            |row| row.get(0),
        )
        .expect("identifier rows");
    assert_eq!(identifiers, 1);

    let transactions: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM correlation_transactions
             WHERE session_id = ?1",
            [&session_id],
            |row| row.get(0),
        )
        .expect("transaction rows");
    assert_eq!(transactions, 13);
}

#[test]
#[serial]
fn overflow_drops_and_counts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("sigmon.db");
    let stats = Arc::new(Statistics::new());
    // Capacity of one, then flood it faster than the thread drains.
    let handle = persistence::spawn(&db_path, 1, stats.clone())
        .expect("spawn persistence");

    let harness = Harness::new();
    for pkt in attach_packets() {
        harness.feed(&pkt);
    }
    harness.correlation.flush_all();
    let closed = Arc::new(harness.closed_sessions().remove(0));

    for _ in 0..64 {
        handle.submit(closed.clone());
    }
    let snapshot = stats.snapshot();
    assert!(
        snapshot.persistence_dropped > 0,
        "flooding a capacity-1 queue must drop"
    );
}
