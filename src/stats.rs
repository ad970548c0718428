// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Rolling pipeline statistics.
//!
//! Writers are the dispatcher workers, updating after every decode; readers
//! (analysis rules, health probes) take an immutable [`StatsSnapshot`].
//! Plain counters are atomics, the procedure table sits behind an RwLock
//! that is only write-locked for a few arithmetic operations per message.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::message::{Message, MessageResult, Protocol};

const RECENT_WINDOW: usize = 1000;
const ERROR_RING: usize = 1000;
/// EMA smoothing factor for procedure latency.
const EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Default)]
struct ProtocolCounters {
    messages: AtomicU64,
    errors: AtomicU64,
}

/// Per-procedure (protocol + message name) counters and latency EMA.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcedureStats {
    pub total: u64,
    pub failures: u64,
    pub ema_latency_ms: f64,
    pub latency_samples: u64,
}

impl ProcedureStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.total - self.failures) as f64 / self.total as f64
    }
}

/// One entry of the bounded recent-error ring.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOccurrence {
    pub timestamp: DateTime<Utc>,
    pub protocol: Protocol,
    pub message_name: String,
    pub cause_code: Option<u32>,
    pub imsi: Option<String>,
}

#[derive(Debug, Default)]
pub struct Statistics {
    total: AtomicU64,
    decode_errors: AtomicU64,
    no_decoder: AtomicU64,
    timeouts: AtomicU64,
    events_dropped: AtomicU64,
    cdrs_dropped: AtomicU64,
    persistence_dropped: AtomicU64,
    per_protocol: [ProtocolCounters; Protocol::ALL.len()],
    /// Last `RECENT_WINDOW` outcomes per protocol (true = success-ish).
    recent: Mutex<Vec<VecDeque<bool>>>,
    per_code: Mutex<HashMap<(Protocol, u32), u64>>,
    procedures: RwLock<HashMap<String, ProcedureStats>>,
    recent_errors: Mutex<VecDeque<ErrorOccurrence>>,
}

impl Statistics {
    pub fn new() -> Self {
        let mut recent = Vec::with_capacity(Protocol::ALL.len());
        recent.resize_with(Protocol::ALL.len(), VecDeque::new);
        Self {
            recent: Mutex::new(recent),
            ..Default::default()
        }
    }

    /// Records one decoded message.
    pub fn record_message(&self, msg: &Message) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let idx = msg.protocol.index();
        self.per_protocol[idx].messages.fetch_add(1, Ordering::Relaxed);

        let failed = msg.result == MessageResult::Failure;
        if failed {
            self.per_protocol[idx].errors.fetch_add(1, Ordering::Relaxed);
            if let Some(code) = msg.cause_code {
                if let Ok(mut codes) = self.per_code.lock() {
                    *codes.entry((msg.protocol, code)).or_insert(0) += 1;
                }
            }
            if let Ok(mut ring) = self.recent_errors.lock() {
                if ring.len() == ERROR_RING {
                    ring.pop_front();
                }
                ring.push_back(ErrorOccurrence {
                    timestamp: msg.timestamp,
                    protocol: msg.protocol,
                    message_name: msg.message_name.clone(),
                    cause_code: msg.cause_code,
                    imsi: msg.keys.imsi.clone(),
                });
            }
        }
        if msg.result == MessageResult::Timeout {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut recent) = self.recent.lock() {
            let window = &mut recent[idx];
            if window.len() == RECENT_WINDOW {
                window.pop_front();
            }
            window.push_back(!failed);
        }

        if let Ok(mut procs) = self.procedures.write() {
            let entry = procs.entry(msg.procedure_key()).or_default();
            entry.total += 1;
            if failed {
                entry.failures += 1;
            }
        }
    }

    /// Feeds one request/response latency observation into the procedure EMA.
    pub fn record_latency(&self, procedure: &str, latency_ms: f64) {
        if let Ok(mut procs) = self.procedures.write() {
            let entry = procs.entry(procedure.to_string()).or_default();
            if entry.latency_samples == 0 {
                entry.ema_latency_ms = latency_ms;
            } else {
                entry.ema_latency_ms = EMA_ALPHA * latency_ms
                    + (1.0 - EMA_ALPHA) * entry.ema_latency_ms;
            }
            entry.latency_samples += 1;
        }
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_decoder(&self) {
        self.no_decoder.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cdr_dropped(&self) {
        self.cdrs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_dropped(&self) {
        self.persistence_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Immutable snapshot for rule evaluation and health probes.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut per_protocol = Vec::with_capacity(Protocol::ALL.len());
        let recent = self.recent.lock().ok();
        for protocol in Protocol::ALL {
            let idx = protocol.index();
            let (recent_success, recent_total) = match &recent {
                Some(windows) => {
                    let w = &windows[idx];
                    (w.iter().filter(|ok| **ok).count(), w.len())
                },
                None => (0, 0),
            };
            per_protocol.push(ProtocolSnapshot {
                protocol,
                messages: self.per_protocol[idx]
                    .messages
                    .load(Ordering::Relaxed),
                errors: self.per_protocol[idx].errors.load(Ordering::Relaxed),
                recent_success,
                recent_total,
            });
        }
        drop(recent);

        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            no_decoder: self.no_decoder.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            cdrs_dropped: self.cdrs_dropped.load(Ordering::Relaxed),
            persistence_dropped: self
                .persistence_dropped
                .load(Ordering::Relaxed),
            per_protocol,
            per_code: self
                .per_code
                .lock()
                .map(|m| m.clone())
                .unwrap_or_default(),
            procedures: self
                .procedures
                .read()
                .map(|m| m.clone())
                .unwrap_or_default(),
            recent_errors: self
                .recent_errors
                .lock()
                .map(|r| r.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtocolSnapshot {
    pub protocol: Protocol,
    pub messages: u64,
    pub errors: u64,
    pub recent_success: usize,
    pub recent_total: usize,
}

impl ProtocolSnapshot {
    /// Success rate over the bounded recent window.
    pub fn recent_success_rate(&self) -> f64 {
        if self.recent_total == 0 {
            return 1.0;
        }
        self.recent_success as f64 / self.recent_total as f64
    }
}

/// Read-only view handed to analysis rules and health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub decode_errors: u64,
    pub no_decoder: u64,
    pub timeouts: u64,
    pub events_dropped: u64,
    pub cdrs_dropped: u64,
    pub persistence_dropped: u64,
    pub per_protocol: Vec<ProtocolSnapshot>,
    #[serde(skip)]
    pub per_code: HashMap<(Protocol, u32), u64>,
    pub procedures: HashMap<String, ProcedureStats>,
    pub recent_errors: Vec<ErrorOccurrence>,
}

impl StatsSnapshot {
    pub fn protocol(&self, protocol: Protocol) -> Option<&ProtocolSnapshot> {
        self.per_protocol.iter().find(|p| p.protocol == protocol)
    }

    pub fn procedure(&self, key: &str) -> Option<&ProcedureStats> {
        self.procedures.get(key)
    }
}
