// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use sigmon_rs::{
    cfg::{
        cli::config_path_from_args,
        config::{Config, ConfigHandle},
        logger::init_logger,
    },
    kb::KnowledgeBase,
    pipeline::spawn_pipeline,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_from_args()?;

    // Initial config failure is the one fatal condition besides binding the
    // input channel; everything later degrades and keeps running.
    let cfg = Config::load_from_file(&config_path)
        .context("failed to load configuration")?;
    let _logger_guard = init_logger(
        std::env::var("SIGMON_LOGGER")
            .unwrap_or_else(|_| "config_logger.yaml".to_string())
            .as_str(),
    )?;
    info!(config = %config_path.display(), "sigmon starting");

    let kb = Arc::new(
        KnowledgeBase::load(
            cfg.knowledge.supplement_path.as_deref(),
        )
        .context("failed to load knowledge base")?,
    );
    info!(error_codes = kb.error_code_count(), "knowledge base loaded");

    let config = ConfigHandle::new(cfg);
    let pipeline = spawn_pipeline(&config.snapshot(), kb, true)?;

    // The packet Source is an external collaborator: it feeds
    // `pipeline.submit(packet)` and blocks on the bounded input channel.
    // The binary wires everything up and then waits for signals.
    let mut sighup = tokio::signal::unix::signal(
        tokio::signal::unix::SignalKind::hangup(),
    )
    .context("failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    error!(error = %err, "signal handler failed");
                }
                break;
            },
            _ = sighup.recv() => {
                soft_reload(&config_path, &config);
            },
        }
    }

    info!("shutting down");
    pipeline.shutdown().await;
    Ok(())
}

/// Soft reload: build the new snapshot off-thread, swap only on success.
fn soft_reload(path: &std::path::Path, config: &ConfigHandle) {
    match Config::load_from_file(path) {
        Ok(next) => {
            config.swap(next);
            info!("configuration reloaded");
        },
        Err(err) => {
            warn!(error = %err, "reload rejected, keeping active config");
        },
    }
}
