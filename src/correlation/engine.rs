// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The correlation engine: multi-identifier index plus session store.
//!
//! Both maps are `DashMap`s, which gives the sharded-mutex layout the rest
//! of the pipeline assumes: `observe` only takes the shard locks of the
//! entries it touches. The index holds session ids, never sessions, so
//! dropping a session can never leave a cycle; closing a session removes
//! its index entries in the same call.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::{
    flow,
    kb::KnowledgeBase,
    models::{
        flow::CapturedFlow,
        identifier::{IdentifierBinding, IdentifierKey, identifiers_of},
        message::{Direction, Message, MessageResult, Protocol},
        session::{LocationUpdate, Session, SessionStatus},
    },
    stats::Statistics,
};

/// Confidence for identifiers learned through a cross-protocol link.
const INHERITED_CONFIDENCE: f64 = 0.95;

/// A closed (completed or expired) session together with its reconstructed
/// flow, handed to the durable-output layer.
#[derive(Debug)]
pub struct CompletedSession {
    pub session: Session,
    pub flow: CapturedFlow,
}

/// Outcome of one `observe` call.
#[derive(Debug, Clone)]
pub struct Observed {
    pub session_id: u64,
    /// Request-to-response latency when this message answered a paired
    /// request inside the same session.
    pub latency_ms: Option<f64>,
    /// IMSI the session is bound to, for rules on messages that do not
    /// carry the identity themselves.
    pub session_imsi: Option<String>,
}

/// Consumer of closed sessions. The pipeline wires the CDR writer and the
/// correlation persistence behind this seam.
pub trait SessionSink: Send + Sync {
    fn on_session_closed(&self, closed: CompletedSession);
}

/// No-op sink for tests and tools that only want the live index.
#[derive(Debug, Default)]
pub struct NullSink;

impl SessionSink for NullSink {
    fn on_session_closed(&self, _closed: CompletedSession) {}
}

pub struct CorrelationEngine {
    sessions: DashMap<u64, Session>,
    index: DashMap<IdentifierKey, u64>,
    next_id: AtomicU64,
    session_timeout: Duration,
    kb: Arc<KnowledgeBase>,
    stats: Arc<Statistics>,
    sink: Arc<dyn SessionSink>,
}

impl CorrelationEngine {
    pub fn new(
        kb: Arc<KnowledgeBase>,
        stats: Arc<Statistics>,
        sink: Arc<dyn SessionSink>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            index: DashMap::new(),
            next_id: AtomicU64::new(1),
            session_timeout,
            kb,
            stats,
            sink,
        }
    }

    /// Attributes one decoded message to a session, creating, joining or
    /// merging as the identifier index dictates.
    pub fn observe(&self, msg: Arc<Message>) -> Observed {
        let ids = identifiers_of(&msg);

        let mut found: Vec<u64> = ids
            .iter()
            .filter_map(|key| self.index.get(key).map(|entry| *entry))
            .collect();
        found.sort_unstable();
        found.dedup();
        // Ids whose session is gone (already flushed) do not count.
        found.retain(|id| self.sessions.contains_key(id));

        let (session_id, latency_ms) = match found.len() {
            0 => self.create_session(&msg, &ids),
            1 => self.join_session(found[0], &msg, &ids),
            _ => self.merge_sessions(&found, &msg, &ids),
        };

        let session_imsi = self
            .with_session(session_id, |s| {
                s.first_identifier(crate::models::IdentifierType::Imsi)
                    .map(str::to_string)
            })
            .flatten();

        if self.is_terminal(session_id, &msg) {
            self.close_session(session_id, SessionStatus::Completed);
        }
        Observed { session_id, latency_ms, session_imsi }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_id_for(&self, key: &IdentifierKey) -> Option<u64> {
        self.index.get(key).map(|e| *e)
    }

    /// Snapshot accessor used by tests and the health probe.
    pub fn with_session<T>(
        &self,
        id: u64,
        f: impl FnOnce(&Session) -> T,
    ) -> Option<T> {
        self.sessions.get(&id).map(|s| f(&s))
    }

    fn create_session(
        &self,
        msg: &Arc<Message>,
        ids: &[IdentifierKey],
    ) -> (u64, Option<f64>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut session = Session::new(id, msg.timestamp);
        let latency = self.apply_message(&mut session, msg);
        for key in ids {
            bind_identifier(&mut session, key, msg, 1.0);
            self.index.insert(key.clone(), id);
        }
        debug!(session = id, protocol = %msg.protocol, "session created");
        self.sessions.insert(id, session);
        (id, latency)
    }

    fn join_session(
        &self,
        id: u64,
        msg: &Arc<Message>,
        ids: &[IdentifierKey],
    ) -> (u64, Option<f64>) {
        let Some(mut session) = self.sessions.get_mut(&id) else {
            // Lost the race against close; the message starts a new session.
            return self.create_session(msg, ids);
        };
        if session.status.is_terminal() {
            drop(session);
            return self.create_session(msg, ids);
        }

        let latency = self.apply_message(&mut session, msg);
        for key in ids {
            let confidence = if session.identifiers.contains_key(key) {
                1.0
            } else {
                INHERITED_CONFIDENCE
            };
            bind_identifier(&mut session, key, msg, confidence);
            self.index.insert(key.clone(), id);
        }
        (id, latency)
    }

    /// Folds all found sessions into the one with the smallest id, then
    /// appends the message there.
    fn merge_sessions(
        &self,
        found: &[u64],
        msg: &Arc<Message>,
        ids: &[IdentifierKey],
    ) -> (u64, Option<f64>) {
        let survivor_id = found[0];
        let losers = &found[1..];

        let mut captured: Vec<Session> = Vec::with_capacity(losers.len());
        for loser_id in losers {
            if let Some((_, session)) = self.sessions.remove(loser_id) {
                captured.push(session);
            }
        }

        let latency;
        {
            let Some(mut survivor) = self.sessions.get_mut(&survivor_id)
            else {
                // Survivor vanished mid-merge; fall back to a fresh session
                // seeded with everything captured.
                return self.rebuild_from(captured, msg, ids);
            };

            for mut loser in captured {
                info!(
                    survivor = survivor_id,
                    absorbed = loser.id,
                    "merging correlated sessions"
                );
                for (key, binding) in loser.identifiers.drain() {
                    self.index.insert(key.clone(), survivor_id);
                    survivor
                        .identifiers
                        .entry(key)
                        .and_modify(|b| {
                            if binding.last_seen > b.last_seen {
                                b.last_seen = binding.last_seen;
                            }
                        })
                        .or_insert(binding);
                }
                merge_messages(&mut survivor, &mut loser);
                survivor.merge_audit.push(format!(
                    "absorbed session {} at {}",
                    loser.external_id(),
                    Utc::now().to_rfc3339()
                ));
            }

            latency = self.apply_message(&mut survivor, msg);
            for key in ids {
                let confidence = if survivor.identifiers.contains_key(key) {
                    1.0
                } else {
                    INHERITED_CONFIDENCE
                };
                bind_identifier(&mut survivor, key, msg, confidence);
                self.index.insert(key.clone(), survivor_id);
            }
        }
        (survivor_id, latency)
    }

    fn rebuild_from(
        &self,
        captured: Vec<Session>,
        msg: &Arc<Message>,
        ids: &[IdentifierKey],
    ) -> (u64, Option<f64>) {
        let (id, latency) = self.create_session(msg, ids);
        if let Some(mut session) = self.sessions.get_mut(&id) {
            for mut loser in captured {
                for (key, binding) in loser.identifiers.drain() {
                    self.index.insert(key.clone(), id);
                    session.identifiers.insert(key, binding);
                }
                merge_messages(&mut session, &mut loser);
            }
        }
        (id, latency)
    }

    /// Per-message derived state: counters, latency pairing, location.
    /// Returns the request/response latency when this message answered a
    /// paired request.
    fn apply_message(
        &self,
        session: &mut Session,
        msg: &Arc<Message>,
    ) -> Option<f64> {
        let mut observed_latency = None;
        if msg.direction == Direction::Response {
            if let Some(request) = session
                .messages
                .iter()
                .rev()
                .find(|m| is_request_of(m, msg))
            {
                let latency_us =
                    (msg.timestamp - request.timestamp).num_microseconds();
                if let Some(us) = latency_us
                    && us >= 0
                {
                    session.metrics.response_count += 1;
                    session.metrics.latency_total_us += us as u64;
                    let ms = us as f64 / 1000.0;
                    self.stats.record_latency(&msg.procedure_key(), ms);
                    observed_latency = Some(ms);
                }
            }
        }

        if let Some(up) =
            msg.details.get("volume_uplink").and_then(|v| v.as_u64())
        {
            session.metrics.bytes_uplink += up;
        }
        if let Some(down) =
            msg.details.get("volume_downlink").and_then(|v| v.as_u64())
        {
            session.metrics.bytes_downlink += down;
        }

        if let Some(uli) = msg.details.get("uli") {
            session.locations.push(LocationUpdate {
                timestamp: msg.timestamp,
                protocol: msg.protocol,
                mcc: None,
                mnc: None,
                lac: None,
                cell_id: uli
                    .get("ecgi")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                tac: uli.get("tac").and_then(|v| v.as_u64()).map(|t| t as u32),
            });
        }

        session.append(msg.clone());
        observed_latency
    }

    /// Terminal-procedure detection per protocol.
    fn is_terminal(&self, session_id: u64, msg: &Message) -> bool {
        match msg.protocol {
            Protocol::Map | Protocol::Cap | Protocol::Inap => {
                // TCAP End or Abort closes the dialogue.
                matches!(msg.message_type, 0x64 | 0x67)
            },
            Protocol::Diameter => {
                let answer = msg.direction == Direction::Response;
                let terminated = msg.message_type == 275;
                let permanent_failure = msg
                    .cause_code
                    .map(|c| (5000..6000).contains(&c))
                    .unwrap_or(false);
                answer && (terminated || permanent_failure)
            },
            Protocol::Gtpv1 => msg.message_type == 21,
            Protocol::Gtpv2 => msg.message_type == 37,
            Protocol::Pfcp => msg.message_type == 55,
            Protocol::Nas => {
                msg.message_name == "Detach Accept"
                    || msg.message_name == "Deregistration Accept"
            },
            Protocol::S1ap | Protocol::Ngap => {
                msg.message_name.starts_with("UE Context Release")
                    && msg.result == MessageResult::Success
            },
            Protocol::Http2 => {
                // A 2xx closing an SBI deletion ends the session.
                msg.result == MessageResult::Success
                    && self
                        .with_session(session_id, |s| {
                            s.messages.iter().any(|m| {
                                m.protocol == Protocol::Http2
                                    && m.details
                                        .get("method")
                                        .and_then(|v| v.as_str())
                                        == Some("DELETE")
                            })
                        })
                        .unwrap_or(false)
            },
        }
    }

    /// Removes the session from the live maps, reconstructs its flow and
    /// hands it to the sink. Terminal states are final.
    fn close_session(&self, id: u64, status: SessionStatus) {
        let Some((_, mut session)) = self.sessions.remove(&id) else {
            return;
        };
        session.status = status;

        for key in session.identifiers.keys() {
            self.index
                .remove_if(key, |_, bound_id| *bound_id == id);
        }

        let flow = flow::reconstruct(&session, &self.kb);
        session.procedure = Some(flow.procedure.clone());
        debug!(
            session = id,
            procedure = %flow.procedure,
            completeness = flow.completeness,
            "session closed"
        );
        self.sink.on_session_closed(CompletedSession { session, flow });
    }

    /// Expires idle sessions. Called by the background sweep task.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let timeout = chrono::Duration::from_std(self.session_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let expired: Vec<u64> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                session.status == SessionStatus::Active
                    && now - session.last_activity > timeout
            })
            .map(|entry| *entry.key())
            .collect();

        let count = expired.len();
        if count > 0 {
            warn!(count, "expiring idle sessions");
        }
        for id in expired {
            self.close_session(id, SessionStatus::Expired);
        }
        count
    }

    /// Force-completes everything, used at shutdown.
    pub fn flush_all(&self) -> usize {
        let ids: Vec<u64> =
            self.sessions.iter().map(|entry| *entry.key()).collect();
        let count = ids.len();
        for id in ids {
            self.close_session(id, SessionStatus::Completed);
        }
        count
    }
}

fn bind_identifier(
    session: &mut Session,
    key: &IdentifierKey,
    msg: &Message,
    confidence: f64,
) {
    session
        .identifiers
        .entry(key.clone())
        .and_modify(|binding| {
            binding.last_seen = msg.timestamp;
            if confidence > binding.confidence {
                binding.confidence = confidence;
            }
        })
        .or_insert_with(|| IdentifierBinding {
            key: key.clone(),
            protocol: msg.protocol,
            first_seen: msg.timestamp,
            last_seen: msg.timestamp,
            confidence,
        });
}

/// Request/response pairing: same protocol plus a shared transaction-scoped
/// key (transaction id, sequence number or Diameter session id).
fn is_request_of(candidate: &Message, response: &Message) -> bool {
    if candidate.direction != Direction::Request
        || candidate.protocol != response.protocol
    {
        return false;
    }
    (candidate.keys.transaction_id.is_some()
        && candidate.keys.transaction_id == response.keys.transaction_id)
        || (candidate.keys.sequence_num.is_some()
            && candidate.keys.sequence_num == response.keys.sequence_num)
        || (candidate.keys.diameter_session_id.is_some()
            && candidate.keys.diameter_session_id
                == response.keys.diameter_session_id)
}

/// Timestamp-ordered interleave of the loser's messages into the survivor.
fn merge_messages(survivor: &mut Session, loser: &mut Session) {
    let mut merged =
        Vec::with_capacity(survivor.messages.len() + loser.messages.len());
    let mut a = std::mem::take(&mut survivor.messages).into_iter().peekable();
    let mut b = std::mem::take(&mut loser.messages).into_iter().peekable();

    loop {
        match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => {
                if x.timestamp <= y.timestamp {
                    merged.extend(a.next());
                } else {
                    merged.extend(b.next());
                }
            },
            (Some(_), None) => merged.extend(a.next()),
            (None, Some(_)) => merged.extend(b.next()),
            (None, None) => break,
        }
    }
    survivor.messages = merged;

    if loser.start_time < survivor.start_time {
        survivor.start_time = loser.start_time;
    }
    if loser.last_activity > survivor.last_activity {
        survivor.last_activity = loser.last_activity;
    }
    survivor.metrics.bytes_uplink += loser.metrics.bytes_uplink;
    survivor.metrics.bytes_downlink += loser.metrics.bytes_downlink;
    survivor.metrics.error_count += loser.metrics.error_count;
    survivor.metrics.response_count += loser.metrics.response_count;
    survivor.metrics.latency_total_us += loser.metrics.latency_total_us;
    survivor.locations.append(&mut loser.locations);
}
