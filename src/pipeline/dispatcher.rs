// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The dispatcher: worker pool, fan-out and background sweeps.
//!
//! Packets enter through one bounded channel; when it fills up the Source
//! blocks, which is the backpressure contract. Each worker decodes, feeds
//! statistics, hands the message to correlation (synchronously, correlation
//! never drops) and analysis, and try-sends it to the event writer where an
//! overflow is counted instead of blocking the decode path.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    analysis::AnalysisEngine,
    cfg::config::Config,
    correlation::{
        CompletedSession, CorrelationEngine, SessionSink,
    },
    decoders::{self, DecodeError, DecoderRegistry},
    kb::KnowledgeBase,
    models::packet::Packet,
    output::{
        CdrWriter, EventWriter, PersistenceHandle,
        cdr_writer::{CDR_FILE_EXT, CDR_FILE_PREFIX},
        event_writer::{EVENT_FILE_EXT, EVENT_FILE_PREFIX},
        persistence, retention,
    },
    stats::Statistics,
};

/// Fans closed sessions out to the CDR writer and the persistence queue.
pub struct OutputSink {
    cdr_tx: mpsc::Sender<Arc<CompletedSession>>,
    persistence: Option<PersistenceHandle>,
    stats: Arc<Statistics>,
}

impl SessionSink for OutputSink {
    fn on_session_closed(&self, closed: CompletedSession) {
        let closed = Arc::new(closed);
        if self.cdr_tx.try_send(closed.clone()).is_err() {
            self.stats.record_cdr_dropped();
        }
        if let Some(persistence) = &self.persistence {
            persistence.submit(closed);
        }
    }
}

/// Running pipeline: the composition of registry, correlation, analysis and
/// writers, plus every background task handle needed for a clean shutdown.
pub struct Pipeline {
    packet_tx: mpsc::Sender<Packet>,
    pub stats: Arc<Statistics>,
    pub correlation: Arc<CorrelationEngine>,
    pub analysis: Arc<AnalysisEngine>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    writers: Vec<JoinHandle<()>>,
    sweepers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Feeds one packet in; blocks when the input buffer is full.
    pub async fn submit(&self, packet: Packet) -> Result<()> {
        self.packet_tx
            .send(packet)
            .await
            .context("packet channel closed")
    }

    /// Non-blocking submission used by sources that prefer to drop.
    pub fn try_submit(&self, packet: Packet) -> bool {
        self.packet_tx.try_send(packet).is_ok()
    }

    /// Orderly shutdown: stop intake, drain workers, force-complete every
    /// session, flush writers.
    pub async fn shutdown(mut self) {
        info!("pipeline shutdown requested");
        self.cancel.cancel();
        drop(self.packet_tx);

        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        for handle in self.sweepers.drain(..) {
            let _ = handle.await;
        }

        let flushed = self.correlation.flush_all();
        info!(flushed, "flushed in-flight sessions");

        // Writer channels close once the correlation engine (their last
        // sender) has flushed; dropping the engine reference does that.
        drop(self.correlation);
        for handle in self.writers.drain(..) {
            let _ = handle.await;
        }
        info!("pipeline shutdown complete");
    }
}

/// Builds and starts the full pipeline.
pub fn spawn_pipeline(
    cfg: &Config,
    kb: Arc<KnowledgeBase>,
    with_persistence: bool,
) -> Result<Pipeline> {
    let stats = Arc::new(Statistics::new());
    let cancel = CancellationToken::new();

    let (event_tx, event_rx) =
        mpsc::channel::<Arc<crate::models::Message>>(
            cfg.pipeline.fanout_buffer_size,
        );
    let (cdr_tx, cdr_rx) =
        mpsc::channel::<Arc<CompletedSession>>(cfg.pipeline.fanout_buffer_size);

    let persistence_handle = if with_persistence {
        Some(persistence::spawn(
            &cfg.persistence.database_path,
            cfg.persistence.buffer_size,
            stats.clone(),
        )?)
    } else {
        None
    };

    let sink = Arc::new(OutputSink {
        cdr_tx,
        persistence: persistence_handle,
        stats: stats.clone(),
    });

    let correlation = Arc::new(CorrelationEngine::new(
        kb.clone(),
        stats.clone(),
        sink,
        cfg.sessions.session_timeout,
    ));
    let analysis = Arc::new(AnalysisEngine::new(kb.clone()));
    let registry = Arc::new(decoders::build_registry(
        &cfg.protocols.enabled_protocols(),
        &kb,
    ));
    info!(decoders = registry.len(), "decoder registry ready");

    let (packet_tx, packet_rx) =
        mpsc::channel::<Packet>(cfg.pipeline.input_buffer_size);
    let packet_rx = Arc::new(Mutex::new(packet_rx));

    let mut workers = Vec::with_capacity(cfg.pipeline.workers);
    for worker_id in 0..cfg.pipeline.workers {
        workers.push(tokio::spawn(worker_loop(
            worker_id,
            packet_rx.clone(),
            registry.clone(),
            correlation.clone(),
            analysis.clone(),
            stats.clone(),
            event_tx.clone(),
            cancel.clone(),
        )));
    }
    drop(event_tx);

    let writers = vec![
        tokio::spawn(event_writer_loop(
            EventWriter::new(&cfg.output.event_dir),
            event_rx,
        )),
        tokio::spawn(cdr_writer_loop(
            CdrWriter::new(&cfg.output.cdr_dir),
            cdr_rx,
        )),
    ];

    let sweepers = vec![
        tokio::spawn(session_sweep_loop(
            correlation.clone(),
            cfg.sessions.sweep_interval,
            cancel.clone(),
        )),
        tokio::spawn(retention_loop(cfg.output.clone(), cancel.clone())),
    ];

    Ok(Pipeline {
        packet_tx,
        stats,
        correlation,
        analysis,
        cancel,
        workers,
        writers,
        sweepers,
    })
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    packet_rx: Arc<Mutex<mpsc::Receiver<Packet>>>,
    registry: Arc<DecoderRegistry>,
    correlation: Arc<CorrelationEngine>,
    analysis: Arc<AnalysisEngine>,
    stats: Arc<Statistics>,
    event_tx: mpsc::Sender<Arc<crate::models::Message>>,
    cancel: CancellationToken,
) {
    debug!(worker_id, "worker started");
    loop {
        let packet = {
            let mut rx = packet_rx.lock().await;
            tokio::select! {
                biased;
                pkt = rx.recv() => pkt,
                () = cancel.cancelled() => rx.try_recv().ok(),
            }
        };
        let Some(packet) = packet else { break };

        match registry.decode(&packet) {
            Ok(msg) => {
                let msg = Arc::new(msg);
                stats.record_message(&msg);
                let observed = correlation.observe(msg.clone());
                let snapshot = stats.snapshot();
                analysis.inspect(
                    &msg,
                    observed.latency_ms,
                    observed.session_imsi.as_deref(),
                    &snapshot,
                );
                if event_tx.try_send(msg).is_err() {
                    stats.record_event_dropped();
                }
            },
            Err(DecodeError::NoDecoderClaim) => {
                stats.record_no_decoder();
                trace!(
                    len = packet.payload.len(),
                    "no decoder claimed packet"
                );
            },
            Err(err) => {
                stats.record_decode_error();
                debug!(error = %err, "decode failed");
            },
        }
    }
    debug!(worker_id, "worker drained");
}

async fn event_writer_loop(
    mut writer: EventWriter,
    mut rx: mpsc::Receiver<Arc<crate::models::Message>>,
) {
    while let Some(msg) = rx.recv().await {
        // Errors are already logged; the writer reopens on the next write.
        let _ = writer.write(&msg).await;
    }
    writer.close().await;
    debug!("event writer closed");
}

async fn cdr_writer_loop(
    mut writer: CdrWriter,
    mut rx: mpsc::Receiver<Arc<CompletedSession>>,
) {
    while let Some(closed) = rx.recv().await {
        let _ = writer.write(&closed).await;
    }
    writer.close().await;
    debug!("cdr writer closed");
}

async fn session_sweep_loop(
    correlation: Arc<CorrelationEngine>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                correlation.sweep(chrono::Utc::now());
            },
        }
    }
}

async fn retention_loop(
    output: crate::cfg::config::OutputConfig,
    cancel: CancellationToken,
) {
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(24 * 3600));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = retention::sweep_now(
                    &output.event_dir,
                    EVENT_FILE_PREFIX,
                    EVENT_FILE_EXT,
                    output.event_retention_days,
                )
                .await
                {
                    warn!(error = %err, "event retention sweep failed");
                }
                if let Err(err) = retention::sweep_now(
                    &output.cdr_dir,
                    CDR_FILE_PREFIX,
                    CDR_FILE_EXT,
                    output.cdr_retention_days,
                )
                .await
                {
                    warn!(error = %err, "cdr retention sweep failed");
                }
            },
        }
    }
}
