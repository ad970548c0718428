// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::{IpAddr, Ipv4Addr};

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// L4 transport the capture source saw the payload on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportProto {
    Tcp,
    Udp,
    Sctp,
}

/// Classic 5-tuple coordinates of a captured packet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiveTuple {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub transport: TransportProto,
}

impl FiveTuple {
    pub fn new(
        src_ip: IpAddr,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
        transport: TransportProto,
    ) -> Self {
        Self { src_ip, dst_ip, src_port, dst_port, transport }
    }

    /// Convenience constructor used all over the tests: both endpoints IPv4.
    pub fn v4(
        src: [u8; 4],
        src_port: u16,
        dst: [u8; 4],
        dst_port: u16,
        transport: TransportProto,
    ) -> Self {
        Self::new(
            IpAddr::V4(Ipv4Addr::from(src)),
            src_port,
            IpAddr::V4(Ipv4Addr::from(dst)),
            dst_port,
            transport,
        )
    }
}

/// One captured signaling packet as delivered by the external Source.
///
/// The payload is the raw L4 body (TCP/UDP/SCTP already stripped by the
/// capture layer). `capture_time` keeps microsecond precision end to end;
/// every decoded [`crate::models::Message`] inherits it untouched.
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: Bytes,
    pub five_tuple: FiveTuple,
    pub capture_time: DateTime<Utc>,
    /// Capture interface name, used for labelling only.
    pub interface: String,
}

impl Packet {
    pub fn new(
        payload: impl Into<Bytes>,
        five_tuple: FiveTuple,
        capture_time: DateTime<Utc>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            payload: payload.into(),
            five_tuple,
            capture_time,
            interface: interface.into(),
        }
    }

    /// Builds a packet from the Source wire contract (microsecond epoch).
    pub fn from_micros(
        payload: impl Into<Bytes>,
        five_tuple: FiveTuple,
        capture_micros: i64,
        interface: impl Into<String>,
    ) -> Self {
        let ts = Utc
            .timestamp_micros(capture_micros)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(payload, five_tuple, ts, interface)
    }
}
