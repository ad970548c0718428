// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Call-detail-record CSV files with hourly rotation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Timelike, Utc};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::error;

use crate::{
    correlation::CompletedSession,
    models::{
        flow::FlowResult,
        identifier::IdentifierType,
        session::Session,
    },
};

pub const CDR_FILE_PREFIX: &str = "cdr_";
pub const CDR_FILE_EXT: &str = "csv";

pub const CDR_COLUMNS: [&str; 13] = [
    "tid",
    "imsi",
    "msisdn",
    "procedure",
    "start_time",
    "end_time",
    "duration_ms",
    "result",
    "cause",
    "plmn",
    "cell_id",
    "apn",
    "vendor",
];

pub fn cdr_file_name(at: DateTime<Utc>) -> String {
    format!(
        "{CDR_FILE_PREFIX}{}_{:02}.{CDR_FILE_EXT}",
        at.format("%Y-%m-%d"),
        at.hour()
    )
}

/// One CDR row, in column order.
pub fn cdr_row(closed: &CompletedSession) -> Vec<String> {
    let session = &closed.session;
    let flow = &closed.flow;

    // An unrecognized flow falls back to the session's own error signal.
    let result = if flow.procedure == "Unknown" {
        if session.metrics.error_count > 0 { "failure" } else { "success" }
    } else {
        match flow.result {
            FlowResult::Success => "success",
            FlowResult::Partial => "partial",
            FlowResult::Failure => "failure",
        }
    };

    vec![
        session.external_id(),
        first_key(session, IdentifierType::Imsi),
        first_key(session, IdentifierType::Msisdn),
        flow.procedure.clone(),
        session.start_time.to_rfc3339(),
        session.last_activity.to_rfc3339(),
        session.duration_ms().to_string(),
        result.to_string(),
        session.last_cause().unwrap_or_default(),
        scan_keys(session, |m| m.keys.plmn.clone()),
        scan_keys(session, |m| m.keys.cell_id.clone()),
        scan_keys(session, |m| m.keys.apn.clone()),
        String::new(),
    ]
}

fn first_key(session: &Session, kind: IdentifierType) -> String {
    session.first_identifier(kind).unwrap_or_default().to_string()
}

fn scan_keys(
    session: &Session,
    pick: impl Fn(&crate::models::message::Message) -> Option<String>,
) -> String {
    session
        .messages
        .iter()
        .find_map(|m| pick(m))
        .unwrap_or_default()
}

pub struct CdrWriter {
    dir: PathBuf,
    current: Option<(String, File)>,
}

impl CdrWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), current: None }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends one CDR row, writing the header when a new file is created.
    pub async fn write(&mut self, closed: &CompletedSession) -> Result<()> {
        match self.write_inner(closed).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.current = None;
                error!(error = %err, "cdr write failed, file will reopen");
                Err(err)
            },
        }
    }

    async fn write_inner(&mut self, closed: &CompletedSession) -> Result<()> {
        let file_name = cdr_file_name(closed.session.last_activity);
        let rotate = match &self.current {
            Some((current_name, _)) => *current_name != file_name,
            None => true,
        };
        if rotate {
            if let Some((_, mut old)) = self.current.take() {
                let _ = old.flush().await;
            }
            tokio::fs::create_dir_all(&self.dir)
                .await
                .context("failed to create cdr directory")?;
            let path = self.dir.join(&file_name);
            let fresh = !path.exists();
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("failed to open {path:?}"))?;
            if fresh {
                file.write_all(encode_row(
                    &CDR_COLUMNS.map(str::to_string),
                )?.as_slice())
                .await?;
            }
            self.current = Some((file_name, file));
        }

        let row = cdr_row(closed);
        let encoded = encode_row(&row)?;
        let (_, file) = self.current.as_mut().context("cdr file not open")?;
        file.write_all(&encoded).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some((_, mut file)) = self.current.take() {
            let _ = file.flush().await;
            let _ = file.sync_all().await;
        }
    }
}

/// CSV-encodes one record with proper quoting.
fn encode_row(fields: &[String]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(fields)?;
    writer.flush()?;
    Ok(writer.into_inner()?)
}
