// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde::{Deserialize, Serialize};

use crate::models::message::Protocol;

/// Protocol names as they appear under `protocols.enabled` in the config.
/// `gtp` is a family switch covering both control-plane versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolName {
    Map,
    Cap,
    Inap,
    Diameter,
    Gtp,
    Pfcp,
    Http2,
    Ngap,
    S1ap,
    Nas,
}

impl ProtocolName {
    pub const ALL: [ProtocolName; 10] = [
        ProtocolName::Map,
        ProtocolName::Cap,
        ProtocolName::Inap,
        ProtocolName::Diameter,
        ProtocolName::Gtp,
        ProtocolName::Pfcp,
        ProtocolName::Http2,
        ProtocolName::Ngap,
        ProtocolName::S1ap,
        ProtocolName::Nas,
    ];

    /// Decoder protocols this config name switches on.
    pub fn expand(&self) -> &'static [Protocol] {
        match self {
            ProtocolName::Map => &[Protocol::Map],
            ProtocolName::Cap => &[Protocol::Cap],
            ProtocolName::Inap => &[Protocol::Inap],
            ProtocolName::Diameter => &[Protocol::Diameter],
            ProtocolName::Gtp => &[Protocol::Gtpv1, Protocol::Gtpv2],
            ProtocolName::Pfcp => &[Protocol::Pfcp],
            ProtocolName::Http2 => &[Protocol::Http2],
            ProtocolName::Ngap => &[Protocol::Ngap],
            ProtocolName::S1ap => &[Protocol::S1ap],
            ProtocolName::Nas => &[Protocol::Nas],
        }
    }
}
