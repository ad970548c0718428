// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Retention sweep: deletes event and CDR files older than the configured
//! number of days, judged by the date encoded in the filename.

use std::path::Path;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

/// Removes files named `<prefix>YYYY-MM-DD[...].<ext>` whose date is older
/// than `retention_days`. Returns the number of files removed.
pub async fn sweep_dir(
    dir: &Path,
    prefix: &str,
    ext: &str,
    retention_days: u32,
    today: NaiveDate,
) -> Result<usize> {
    let mut removed = 0usize;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        // A directory that does not exist yet has nothing to clean.
        Err(_) => return Ok(0),
    };

    let cutoff = today - chrono::Duration::days(i64::from(retention_days));

    while let Ok(Some(entry)) = entries.next_entry().await.map_err(|e| {
        warn!(error = %e, "retention sweep read_dir failed");
        e
    }) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(date) = file_date(name, prefix, ext) else { continue };
        if date < cutoff {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    info!(file = name, "retention removed expired file");
                    removed += 1;
                },
                Err(err) => {
                    warn!(file = name, error = %err, "retention remove failed");
                },
            }
        }
    }
    Ok(removed)
}

/// Parses the `YYYY-MM-DD` embedded right after the prefix.
pub fn file_date(name: &str, prefix: &str, ext: &str) -> Option<NaiveDate> {
    if !name.starts_with(prefix) || !name.ends_with(ext) {
        return None;
    }
    let date_part = name.get(prefix.len()..prefix.len() + 10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Convenience wrapper sweeping with "today" as the reference date.
pub async fn sweep_now(
    dir: &Path,
    prefix: &str,
    ext: &str,
    retention_days: u32,
) -> Result<usize> {
    sweep_dir(dir, prefix, ext, retention_days, Utc::now().date_naive()).await
}
