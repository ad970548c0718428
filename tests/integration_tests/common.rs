// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared harness: wire-message builders plus an in-process pipeline core
//! (registry, correlation, analysis, stats) with a capturing session sink.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use sigmon_rs::{
    analysis::AnalysisEngine,
    correlation::{CompletedSession, CorrelationEngine, Observed, SessionSink},
    decoders::{self, DecoderRegistry, codec},
    kb::KnowledgeBase,
    models::{
        issue::Issue,
        message::{Message, Protocol},
        packet::{FiveTuple, Packet, TransportProto},
    },
    stats::Statistics,
};

pub const IMSI: &str = "001010000000001";
pub const UE_SIDE: [u8; 4] = [10, 10, 0, 1];
pub const CORE_SIDE: [u8; 4] = [10, 0, 0, 9];

pub fn ts(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0)
        .single()
        .expect("valid timestamp")
        + chrono::Duration::seconds(offset_secs)
}

pub fn packet(
    payload: Vec<u8>,
    src: [u8; 4],
    src_port: u16,
    dst: [u8; 4],
    dst_port: u16,
    transport: TransportProto,
    at: DateTime<Utc>,
) -> Packet {
    Packet::new(
        Bytes::from(payload),
        FiveTuple::v4(src, src_port, dst, dst_port, transport),
        at,
        "cap0",
    )
}

// ── Wire builders ───────────────────────────────────────────────────────────

pub fn avp(code: u32, value: &[u8]) -> Vec<u8> {
    let len = 8 + value.len();
    let mut out = Vec::with_capacity(len + 3);
    out.extend_from_slice(&code.to_be_bytes());
    out.push(0x40);
    out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    out.extend_from_slice(value);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

pub fn diameter_msg(
    command: u32,
    request: bool,
    avps: &[Vec<u8>],
) -> Vec<u8> {
    let body: Vec<u8> = avps.concat();
    let total = 20 + body.len();
    let mut out = Vec::with_capacity(total);
    out.push(1);
    out.extend_from_slice(&(total as u32).to_be_bytes()[1..]);
    out.push(if request { 0x80 } else { 0x00 });
    out.extend_from_slice(&command.to_be_bytes()[1..]);
    out.extend_from_slice(&16777251u32.to_be_bytes());
    out.extend_from_slice(&0x11112222u32.to_be_bytes());
    out.extend_from_slice(&0x33334444u32.to_be_bytes());
    out.extend_from_slice(&body);
    out
}

pub fn diameter_packet(
    command: u32,
    request: bool,
    session_id: &str,
    user_name: Option<&str>,
    result_code: Option<u32>,
    at: DateTime<Utc>,
) -> Packet {
    let mut avps = vec![avp(263, session_id.as_bytes())];
    if let Some(name) = user_name {
        avps.push(avp(1, name.as_bytes()));
    }
    if let Some(code) = result_code {
        avps.push(avp(268, &code.to_be_bytes()));
    }
    let (src, dst) = if request {
        (CORE_SIDE, [10, 0, 0, 20])
    } else {
        ([10, 0, 0, 20], CORE_SIDE)
    };
    packet(
        diameter_msg(command, request, &avps),
        src,
        3868,
        dst,
        3868,
        TransportProto::Tcp,
        at,
    )
}

pub fn ie_v2(ie_type: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + value.len());
    out.push(ie_type);
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.push(0);
    out.extend_from_slice(value);
    out
}

pub fn gtpv2_msg(
    msg_type: u8,
    teid: u32,
    seq: u32,
    ies: &[Vec<u8>],
) -> Vec<u8> {
    let body: Vec<u8> = ies.concat();
    let declared = 8 + body.len();
    let mut out = Vec::with_capacity(4 + declared);
    out.push(0x48);
    out.push(msg_type);
    out.extend_from_slice(&(declared as u16).to_be_bytes());
    out.extend_from_slice(&teid.to_be_bytes());
    out.extend_from_slice(&seq.to_be_bytes()[1..]);
    out.push(0);
    out.extend_from_slice(&body);
    out
}

pub fn fteid_value(teid: u32, ip: [u8; 4]) -> Vec<u8> {
    let mut out = vec![0x80 | 0x0A];
    out.extend_from_slice(&teid.to_be_bytes());
    out.extend_from_slice(&ip);
    out
}

pub fn imsi_ie() -> Vec<u8> {
    ie_v2(1, &codec::encode_bcd(IMSI).expect("bcd"))
}

pub fn gtp_packet(payload: Vec<u8>, request: bool, at: DateTime<Utc>) -> Packet {
    let (src, dst) = if request {
        (CORE_SIDE, [10, 0, 0, 30])
    } else {
        ([10, 0, 0, 30], CORE_SIDE)
    };
    packet(payload, src, 2123, dst, 2123, TransportProto::Udp, at)
}

pub fn nas_attach_request_payload() -> Vec<u8> {
    let mut identity = vec![(IMSI.as_bytes()[0] - b'0') << 4 | 0x09];
    identity.extend_from_slice(&codec::encode_bcd(&IMSI[1..]).expect("bcd"));
    let mut payload = vec![0x07, 0x41, 0x01, identity.len() as u8];
    payload.extend_from_slice(&identity);
    payload
}

/// Bare NAS leg; uplink decides which endpoint is the subscriber side.
pub fn nas_packet(payload: Vec<u8>, uplink: bool, at: DateTime<Utc>) -> Packet {
    let (src, dst) = if uplink {
        (UE_SIDE, CORE_SIDE)
    } else {
        (CORE_SIDE, UE_SIDE)
    };
    packet(payload, src, 36412, dst, 36412, TransportProto::Udp, at)
}

pub fn ran_pdu(pdu_type: u8, procedure: u8, ies: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (id, value) in ies {
        body.extend_from_slice(&id.to_be_bytes());
        body.push(0x40);
        body.push(value.len() as u8);
        body.extend_from_slice(value);
    }
    let mut out = vec![pdu_type, procedure, 0x40];
    out.push(body.len() as u8);
    out.extend_from_slice(&body);
    out
}

/// S1AP exchange between the eNB side (UE_SIDE address) and the MME.
pub fn s1ap_packet(
    payload: Vec<u8>,
    from_enb: bool,
    at: DateTime<Utc>,
) -> Packet {
    let (src, dst) = if from_enb {
        (UE_SIDE, CORE_SIDE)
    } else {
        (CORE_SIDE, UE_SIDE)
    };
    packet(payload, src, 36412, dst, 36412, TransportProto::Sctp, at)
}

fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    assert!(value.len() < 128);
    let mut out = Vec::with_capacity(2 + value.len());
    out.push(tag);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
    out
}

/// MAP dialogue End carrying a returnError with the given code and IMSI.
pub fn map_error_packet(error_code: u8, at: DateTime<Utc>) -> Packet {
    let bcd = codec::encode_bcd(IMSI).expect("bcd");
    let mut ret_err = tlv(0x02, &[1]);
    ret_err.extend_from_slice(&tlv(0x02, &[error_code]));
    ret_err.extend_from_slice(&tlv(0x30, &tlv(0x04, &bcd)));
    let components = tlv(0x6C, &tlv(0xA3, &ret_err));
    let mut body = tlv(0x49, &[0xAA, 0xBB, 0xCC, 0xDD]);
    body.extend_from_slice(&components);
    packet(
        tlv(0x64, &body),
        [10, 0, 1, 1],
        2905,
        [10, 0, 1, 2],
        2905,
        TransportProto::Sctp,
        at,
    )
}

// ── Harness ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CaptureSink {
    pub closed: Mutex<Vec<CompletedSession>>,
}

impl SessionSink for CaptureSink {
    fn on_session_closed(&self, closed: CompletedSession) {
        self.closed
            .lock()
            .expect("sink lock")
            .push(closed);
    }
}

pub struct Harness {
    pub kb: Arc<KnowledgeBase>,
    pub stats: Arc<Statistics>,
    pub registry: DecoderRegistry,
    pub correlation: Arc<CorrelationEngine>,
    pub analysis: AnalysisEngine,
    pub sink: Arc<CaptureSink>,
}

impl Harness {
    pub fn new() -> Self {
        let kb = Arc::new(KnowledgeBase::load(None).expect("kb"));
        let stats = Arc::new(Statistics::new());
        let sink = Arc::new(CaptureSink::default());
        let correlation = Arc::new(CorrelationEngine::new(
            kb.clone(),
            stats.clone(),
            sink.clone(),
            Duration::from_secs(300),
        ));
        let registry = decoders::build_registry(&Protocol::ALL, &kb);
        let analysis = AnalysisEngine::new(kb.clone());
        Self { kb, stats, registry, correlation, analysis, sink }
    }

    /// Runs one packet through decode, stats, correlation and analysis,
    /// exactly like a dispatcher worker.
    pub fn feed(&self, pkt: &Packet) -> (Arc<Message>, Observed, Vec<Issue>) {
        let msg = Arc::new(self.registry.decode(pkt).expect("decode"));
        self.stats.record_message(&msg);
        let observed = self.correlation.observe(msg.clone());
        let snapshot = self.stats.snapshot();
        let issues = self.analysis.inspect(
            &msg,
            observed.latency_ms,
            observed.session_imsi.as_deref(),
            &snapshot,
        );
        (msg, observed, issues)
    }

    pub fn closed_sessions(&self) -> Vec<CompletedSession> {
        std::mem::take(&mut *self.sink.closed.lock().expect("sink lock"))
    }
}

/// Column-shape assertion shared by the CDR tests.
pub fn cdr_columns_check(row: &[String]) {
    assert_eq!(row.len(), 13, "cdr row has thirteen columns");
    assert!(row[0].starts_with("sess-"));
    chrono::DateTime::parse_from_rfc3339(&row[4]).expect("start_time rfc3339");
    chrono::DateTime::parse_from_rfc3339(&row[5]).expect("end_time rfc3339");
    row[6].parse::<i64>().expect("duration_ms numeric");
}

/// The thirteen packets of a clean 4G attach, one second apart.
pub fn attach_packets() -> Vec<Packet> {
    let t1 = 0xC0FFEE;
    vec![
        nas_packet(nas_attach_request_payload(), true, ts(0)),
        diameter_packet(318, true, "mme01;air;1", Some(IMSI), None, ts(1)),
        diameter_packet(318, false, "mme01;air;1", None, Some(2001), ts(2)),
        nas_packet(vec![0x07, 0x52, 0x00], false, ts(3)),
        nas_packet(vec![0x07, 0x53, 0x00], true, ts(4)),
        diameter_packet(316, true, "mme01;ulr;1", Some(IMSI), None, ts(5)),
        diameter_packet(316, false, "mme01;ulr;1", None, Some(2001), ts(6)),
        gtp_packet(
            gtpv2_msg(
                32,
                0,
                0xA1,
                &[
                    imsi_ie(),
                    ie_v2(
                        71,
                        &codec::encode_apn("internet.mnc001.mcc001.gprs")
                            .expect("apn"),
                    ),
                    ie_v2(87, &fteid_value(t1, [10, 0, 0, 9])),
                ],
            ),
            true,
            ts(7),
        ),
        gtp_packet(
            gtpv2_msg(33, t1, 0xA1, &[ie_v2(2, &[16, 0])]),
            false,
            ts(8),
        ),
        s1ap_packet(
            ran_pdu(0x00, 9, &[(0, vec![0x11]), (8, vec![0x21])]),
            false,
            ts(9),
        ),
        s1ap_packet(ran_pdu(0x20, 9, &[(0, vec![0x11])]), true, ts(10)),
        nas_packet(vec![0x07, 0x42], false, ts(11)),
        nas_packet(vec![0x07, 0x43], true, ts(12)),
    ]
}
