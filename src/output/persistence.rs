// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Correlation persistence into the SQL schema.
//!
//! The statements are PostgreSQL-compatible; the embedded SQLite backend
//! stands in for the external database. All writes happen on one dedicated
//! thread fed by a bounded queue: the decode path only ever does a
//! `try_send`, and when the queue is full the oldest behavior is modelled
//! by dropping the new write and counting it.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::{
    correlation::CompletedSession, models::identifier::IdentifierType,
    stats::Statistics,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS correlation_sessions (
    id                  VARCHAR(100) PRIMARY KEY,
    start_time          TIMESTAMP NOT NULL,
    end_time            TIMESTAMP,
    status              VARCHAR(20) NOT NULL,
    session_type        VARCHAR(30),
    bytes_uplink        BIGINT DEFAULT 0,
    bytes_downlink      BIGINT DEFAULT 0,
    success_rate        DOUBLE PRECISION,
    avg_latency_ms      DOUBLE PRECISION,
    error_count         BIGINT DEFAULT 0,
    map_transaction_id  VARCHAR(100),
    diameter_session_id VARCHAR(255),
    gtp_teid            VARCHAR(20),
    pfcp_seid           VARCHAR(30),
    ngap_ue_id          VARCHAR(30),
    s1ap_mme_id         VARCHAR(30),
    created_at          TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at          TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_sessions_start
    ON correlation_sessions (start_time DESC);
CREATE INDEX IF NOT EXISTS idx_sessions_status
    ON correlation_sessions (status);

CREATE TABLE IF NOT EXISTS correlation_identifiers (
    id               INTEGER PRIMARY KEY,
    session_id       VARCHAR(100) NOT NULL
        REFERENCES correlation_sessions(id),
    identifier_type  VARCHAR(30) NOT NULL,
    identifier_value VARCHAR(255) NOT NULL,
    protocol         VARCHAR(20),
    first_seen       TIMESTAMP,
    last_seen        TIMESTAMP,
    confidence       DOUBLE PRECISION,
    UNIQUE (session_id, identifier_type, identifier_value)
);
CREATE INDEX IF NOT EXISTS idx_identifiers_reverse
    ON correlation_identifiers (identifier_type, identifier_value);

CREATE TABLE IF NOT EXISTS correlation_transactions (
    id             INTEGER PRIMARY KEY,
    session_id     VARCHAR(100) NOT NULL
        REFERENCES correlation_sessions(id),
    transaction_id VARCHAR(100) UNIQUE,
    protocol       VARCHAR(20),
    timestamp      TIMESTAMP,
    success        BOOLEAN,
    latency_ms     DOUBLE PRECISION
);

CREATE TABLE IF NOT EXISTS correlation_location_history (
    id            INTEGER PRIMARY KEY,
    session_id    VARCHAR(100) NOT NULL
        REFERENCES correlation_sessions(id),
    timestamp     TIMESTAMP,
    protocol      VARCHAR(20),
    mcc           VARCHAR(3),
    mnc           VARCHAR(3),
    lac           INTEGER,
    cell_id       VARCHAR(30),
    tac           INTEGER,
    eutran_cgi    VARCHAR(30),
    global_ran_id VARCHAR(30)
);
";

/// Backoff schedule for transient database errors.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_secs(2),
];

/// Handle owned by the session sink; sending never blocks the pipeline.
pub struct PersistenceHandle {
    tx: mpsc::Sender<Arc<CompletedSession>>,
    stats: Arc<Statistics>,
}

impl PersistenceHandle {
    pub fn submit(&self, closed: Arc<CompletedSession>) {
        if self.tx.try_send(closed).is_err() {
            self.stats.record_persistence_dropped();
        }
    }
}

/// Spawns the writer thread and returns the submit handle.
pub fn spawn(
    db_path: &Path,
    buffer: usize,
    stats: Arc<Statistics>,
) -> Result<PersistenceHandle> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("failed to open database {db_path:?}"))?;
    conn.execute_batch(SCHEMA)
        .context("failed to apply persistence schema")?;

    let (tx, mut rx) = mpsc::channel::<Arc<CompletedSession>>(buffer);
    std::thread::Builder::new()
        .name("persistence".to_string())
        .spawn(move || {
            while let Some(closed) = rx.blocking_recv() {
                write_with_retry(&conn, &closed);
            }
            debug!("persistence thread draining done");
        })
        .context("failed to spawn persistence thread")?;

    Ok(PersistenceHandle { tx, stats })
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy)
            | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

fn write_with_retry(conn: &Connection, closed: &CompletedSession) {
    let mut attempt = 0usize;
    loop {
        match write_session(conn, closed) {
            Ok(()) => return,
            Err(err) if is_transient(&err) && attempt < RETRY_BACKOFF.len() => {
                warn!(
                    attempt,
                    error = %err,
                    "transient database error, backing off"
                );
                std::thread::sleep(RETRY_BACKOFF[attempt]);
                attempt += 1;
            },
            Err(err) => {
                // Constraint violations and other permanent errors drop the
                // row; retrying cannot fix them.
                error!(
                    session = %closed.session.external_id(),
                    error = %err,
                    "dropping persistence row"
                );
                return;
            },
        }
    }
}

fn first_identifier(
    closed: &CompletedSession,
    kind: IdentifierType,
) -> Option<String> {
    closed
        .session
        .first_identifier(kind)
        .map(str::to_string)
}

fn write_session(
    conn: &Connection,
    closed: &CompletedSession,
) -> Result<(), rusqlite::Error> {
    let session = &closed.session;
    let id = session.external_id();

    conn.execute(
        "INSERT INTO correlation_sessions (
            id, start_time, end_time, status, session_type,
            bytes_uplink, bytes_downlink, success_rate, avg_latency_ms,
            error_count, map_transaction_id, diameter_session_id,
            gtp_teid, pfcp_seid, ngap_ue_id, s1ap_mme_id, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
            ?15, ?16, CURRENT_TIMESTAMP
        )
        ON CONFLICT(id) DO UPDATE SET
            end_time = excluded.end_time,
            status = excluded.status,
            bytes_uplink = excluded.bytes_uplink,
            bytes_downlink = excluded.bytes_downlink,
            success_rate = excluded.success_rate,
            avg_latency_ms = excluded.avg_latency_ms,
            error_count = excluded.error_count,
            updated_at = CURRENT_TIMESTAMP",
        rusqlite::params![
            id,
            session.start_time.to_rfc3339(),
            session.last_activity.to_rfc3339(),
            format!("{:?}", session.status).to_lowercase(),
            format!("{:?}", session.kind).to_lowercase(),
            session.metrics.bytes_uplink as i64,
            session.metrics.bytes_downlink as i64,
            session.success_rate(),
            session.metrics.avg_latency_ms(),
            session.metrics.error_count as i64,
            closed
                .session
                .messages
                .iter()
                .find(|m| m.protocol == crate::models::Protocol::Map)
                .and_then(|m| m.keys.transaction_id.clone()),
            first_identifier(closed, IdentifierType::DiameterSessionId),
            first_identifier(closed, IdentifierType::Teid),
            first_identifier(closed, IdentifierType::Seid),
            first_identifier(closed, IdentifierType::AmfUeId),
            first_identifier(closed, IdentifierType::MmeUeId),
        ],
    )?;

    for binding in session.identifiers.values() {
        conn.execute(
            "INSERT INTO correlation_identifiers (
                session_id, identifier_type, identifier_value,
                protocol, first_seen, last_seen, confidence
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(session_id, identifier_type, identifier_value)
            DO UPDATE SET
                last_seen = excluded.last_seen,
                confidence = excluded.confidence",
            rusqlite::params![
                id,
                binding.key.kind.as_str(),
                binding.key.value,
                binding.protocol.as_str(),
                binding.first_seen.to_rfc3339(),
                binding.last_seen.to_rfc3339(),
                binding.confidence,
            ],
        )?;
    }

    for msg in &session.messages {
        conn.execute(
            "INSERT INTO correlation_transactions (
                session_id, transaction_id, protocol, timestamp, success,
                latency_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(transaction_id) DO NOTHING",
            rusqlite::params![
                id,
                msg.id.to_string(),
                msg.protocol.as_str(),
                msg.timestamp.to_rfc3339(),
                !msg.is_failure(),
                msg.decode_time_us as f64 / 1000.0,
            ],
        )?;
    }

    for location in &session.locations {
        conn.execute(
            "INSERT INTO correlation_location_history (
                session_id, timestamp, protocol, mcc, mnc, lac, cell_id,
                tac, eutran_cgi, global_ran_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                id,
                location.timestamp.to_rfc3339(),
                location.protocol.as_str(),
                location.mcc,
                location.mnc,
                location.lac,
                location.cell_id,
                location.tac,
                location.cell_id,
                Option::<String>::None,
            ],
        )?;
    }

    Ok(())
}
