// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Decoder registry and the per-protocol wire decoders.
//!
//! Every decoder is stateless and reentrant: it borrows the payload, decides
//! [`Decoder::can_decode`] cheaply (first bytes plus transport metadata) and
//! produces one [`Message`] on [`Decoder::decode`]. Dispatch is first-match
//! in registration order, so registration order is part of the contract:
//! the TCAP family goes MAP, CAP, INAP, and PFCP is probed before GTPv1
//! (both carry version 1 in the top three header bits, the UDP port tells
//! them apart).

pub mod codec;
pub mod diameter;
pub mod gtp;
pub mod hpack;
pub mod http2;
pub mod nas;
pub mod ngap;
pub mod pfcp;
pub mod tcap;

use enum_dispatch::enum_dispatch;
use thiserror::Error;

pub use crate::decoders::{
    diameter::DiameterDecoder,
    gtp::{Gtpv1Decoder, Gtpv2Decoder},
    http2::Http2Decoder,
    nas::NasDecoder,
    ngap::{NgapDecoder, S1apDecoder},
    pfcp::PfcpDecoder,
    tcap::{CapDecoder, InapDecoder, MapDecoder},
};
use crate::models::{
    message::{Message, Protocol},
    packet::Packet,
};

/// Typed decode failure. The dispatcher counts these and moves on; nothing
/// on the decode path panics on wire input.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{what}: payload too short, need {need} bytes, got {got}")]
    Truncated {
        what: &'static str,
        need: usize,
        got: usize,
    },
    #[error("{protocol}: unsupported version {version}")]
    UnsupportedVersion {
        protocol: &'static str,
        version: u8,
    },
    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },
    #[error("no decoder claimed the payload")]
    NoDecoderClaim,
}

impl DecodeError {
    pub fn truncated(what: &'static str, need: usize, got: usize) -> Self {
        DecodeError::Truncated { what, need, got }
    }

    pub fn malformed(what: &'static str, detail: String) -> Self {
        DecodeError::Malformed { what, detail }
    }
}

/// Common contract of every protocol decoder.
#[enum_dispatch]
pub trait Decoder {
    /// The protocol tag this decoder produces.
    fn protocol(&self) -> Protocol;

    /// Cheap claim check: header magic plus transport metadata. Must not
    /// allocate.
    fn can_decode(&self, packet: &Packet) -> bool;

    /// Full decode. Only called after `can_decode` returned true, but must
    /// still validate everything it reads.
    fn decode(&self, packet: &Packet) -> Result<Message, DecodeError>;
}

/// All registered decoder kinds; dispatch is static via `enum_dispatch`.
#[enum_dispatch(Decoder)]
#[derive(Debug)]
pub enum ProtocolDecoder {
    Map(MapDecoder),
    Cap(CapDecoder),
    Inap(InapDecoder),
    Diameter(DiameterDecoder),
    Pfcp(PfcpDecoder),
    Gtpv1(Gtpv1Decoder),
    Gtpv2(Gtpv2Decoder),
    Http2(Http2Decoder),
    Ngap(NgapDecoder),
    S1ap(S1apDecoder),
    Nas(NasDecoder),
}

/// Ordered decoder collection with first-match dispatch.
#[derive(Debug, Default)]
pub struct DecoderRegistry {
    decoders: Vec<ProtocolDecoder>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, decoder: ProtocolDecoder) {
        self.decoders.push(decoder);
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// First decoder that claims the payload wins.
    pub fn decode(&self, packet: &Packet) -> Result<Message, DecodeError> {
        for decoder in &self.decoders {
            if decoder.can_decode(packet) {
                return decoder.decode(packet);
            }
        }
        Err(DecodeError::NoDecoderClaim)
    }
}

/// Builds the registry for the enabled protocols in canonical claim order.
pub fn build_registry(
    enabled: &[Protocol],
    kb: &std::sync::Arc<crate::kb::KnowledgeBase>,
) -> DecoderRegistry {
    let mut registry = DecoderRegistry::new();
    for protocol in [
        Protocol::Map,
        Protocol::Cap,
        Protocol::Inap,
        Protocol::Diameter,
        Protocol::Pfcp,
        Protocol::Gtpv1,
        Protocol::Gtpv2,
        Protocol::Http2,
        Protocol::Ngap,
        Protocol::S1ap,
        Protocol::Nas,
    ] {
        if !enabled.contains(&protocol) {
            continue;
        }
        let decoder = match protocol {
            Protocol::Map => ProtocolDecoder::Map(MapDecoder::new(kb.clone())),
            Protocol::Cap => ProtocolDecoder::Cap(CapDecoder::new(kb.clone())),
            Protocol::Inap => {
                ProtocolDecoder::Inap(InapDecoder::new(kb.clone()))
            },
            Protocol::Diameter => {
                ProtocolDecoder::Diameter(DiameterDecoder::new(kb.clone()))
            },
            Protocol::Pfcp => {
                ProtocolDecoder::Pfcp(PfcpDecoder::new(kb.clone()))
            },
            Protocol::Gtpv1 => {
                ProtocolDecoder::Gtpv1(Gtpv1Decoder::new(kb.clone()))
            },
            Protocol::Gtpv2 => {
                ProtocolDecoder::Gtpv2(Gtpv2Decoder::new(kb.clone()))
            },
            Protocol::Http2 => {
                ProtocolDecoder::Http2(Http2Decoder::new(kb.clone()))
            },
            Protocol::Ngap => {
                ProtocolDecoder::Ngap(NgapDecoder::new(kb.clone()))
            },
            Protocol::S1ap => {
                ProtocolDecoder::S1ap(S1apDecoder::new(kb.clone()))
            },
            Protocol::Nas => ProtocolDecoder::Nas(NasDecoder::new(kb.clone())),
        };
        registry.register(decoder);
    }
    registry
}
