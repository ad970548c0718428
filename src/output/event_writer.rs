// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Append-only JSON-Lines event files with daily rotation.
//!
//! One JSON object per decoded message, flushed per write. The file is
//! keyed by the UTC date of the message timestamp, so replayed captures
//! land in the files of their capture day, not of the wall clock.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::error;

use crate::models::message::Message;

pub const EVENT_FILE_PREFIX: &str = "events_";
pub const EVENT_FILE_EXT: &str = "jsonl";

pub fn event_file_name(date: NaiveDate) -> String {
    format!("{EVENT_FILE_PREFIX}{}.{EVENT_FILE_EXT}", date.format("%Y-%m-%d"))
}

pub struct EventWriter {
    dir: PathBuf,
    current: Option<(NaiveDate, File)>,
}

impl EventWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), current: None }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends one message as a JSON line, rotating on a date change. An
    /// I/O failure drops the current handle so the next write reopens.
    pub async fn write(&mut self, msg: &Message) -> Result<()> {
        let date = msg.timestamp.date_naive();
        match self.write_inner(msg, date).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.current = None;
                error!(error = %err, "event write failed, file will reopen");
                Err(err)
            },
        }
    }

    async fn write_inner(
        &mut self,
        msg: &Message,
        date: NaiveDate,
    ) -> Result<()> {
        let rotate = match &self.current {
            Some((current_date, _)) => *current_date != date,
            None => true,
        };
        if rotate {
            if let Some((_, mut old)) = self.current.take() {
                let _ = old.flush().await;
            }
            tokio::fs::create_dir_all(&self.dir)
                .await
                .context("failed to create event directory")?;
            let path = self.dir.join(event_file_name(date));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("failed to open {path:?}"))?;
            self.current = Some((date, file));
        }

        let line =
            serde_json::to_string(msg).context("failed to encode event")?;
        let (_, file) = self
            .current
            .as_mut()
            .context("event file not open")?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
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
