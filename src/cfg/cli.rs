// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolves a config path from the command line, falling back to the
/// `SIGMON_CONFIG` environment variable and then the bundled default.
pub fn config_path_from_args() -> Result<PathBuf> {
    let arg = std::env::args().nth(1);
    let raw = arg
        .or_else(|| std::env::var("SIGMON_CONFIG").ok())
        .unwrap_or_else(|| "config.yaml".to_string());
    resolve_config_path(&raw)
}

pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    let canon = abs
        .canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))?;

    Ok(canon)
}
