// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde::{Deserialize, Serialize};

use crate::models::message::Protocol;

/// One standards document the knowledge base can point at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standard {
    /// Short id used in references, e.g. "TS 29.272".
    pub id: String,
    pub title: String,
    pub organization: String,
    pub protocols: Vec<Protocol>,
}

/// A vendor-specific extension range or behavior worth recognizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorExtension {
    pub vendor: String,
    pub protocol: Protocol,
    pub description: String,
    /// Vendor-Id for Diameter AVPs, enterprise code elsewhere.
    pub vendor_id: Option<u32>,
}

fn standard(
    id: &str,
    title: &str,
    organization: &str,
    protocols: &[Protocol],
) -> Standard {
    Standard {
        id: id.to_string(),
        title: title.to_string(),
        organization: organization.to_string(),
        protocols: protocols.to_vec(),
    }
}

pub fn builtin_standards() -> Vec<Standard> {
    use Protocol::{
        Cap, Diameter, Gtpv1, Gtpv2, Http2, Inap, Map, Nas, Ngap, Pfcp, S1ap,
    };

    vec![
        standard(
            "TS 29.002",
            "Mobile Application Part (MAP) specification",
            "3GPP",
            &[Map],
        ),
        standard(
            "TS 29.078",
            "CAMEL Application Part (CAP) specification",
            "3GPP",
            &[Cap],
        ),
        standard(
            "Q.1218",
            "Intelligent Network Application Protocol (INAP) CS-1",
            "ITU-T",
            &[Inap],
        ),
        standard(
            "RFC 6733",
            "Diameter Base Protocol",
            "IETF",
            &[Diameter],
        ),
        standard(
            "TS 29.272",
            "MME and SGSN related interfaces based on Diameter (S6a/S6d)",
            "3GPP",
            &[Diameter],
        ),
        standard(
            "TS 29.060",
            "GPRS Tunnelling Protocol (GTP) across the Gn and Gp interface",
            "3GPP",
            &[Gtpv1],
        ),
        standard(
            "TS 29.274",
            "Evolved GPRS Tunnelling Protocol for Control plane (GTPv2-C)",
            "3GPP",
            &[Gtpv2],
        ),
        standard(
            "TS 29.244",
            "Interface between the Control Plane and the User Plane nodes \
             (PFCP)",
            "3GPP",
            &[Pfcp],
        ),
        standard(
            "TS 29.500",
            "Technical Realization of Service Based Architecture",
            "3GPP",
            &[Http2],
        ),
        standard(
            "TS 36.413",
            "S1 Application Protocol (S1AP)",
            "3GPP",
            &[S1ap],
        ),
        standard(
            "TS 38.413",
            "NG Application Protocol (NGAP)",
            "3GPP",
            &[Ngap],
        ),
        standard(
            "TS 24.301",
            "Non-Access-Stratum (NAS) protocol for EPS",
            "3GPP",
            &[Nas],
        ),
        standard(
            "TS 24.501",
            "Non-Access-Stratum (NAS) protocol for 5GS",
            "3GPP",
            &[Nas],
        ),
    ]
}

pub fn builtin_vendor_extensions() -> Vec<VendorExtension> {
    vec![
        VendorExtension {
            vendor: "3GPP".to_string(),
            protocol: Protocol::Diameter,
            description: "3GPP vendor-specific AVPs (Vendor-Id 10415)"
                .to_string(),
            vendor_id: Some(10415),
        },
        VendorExtension {
            vendor: "Ericsson".to_string(),
            protocol: Protocol::Diameter,
            description: "Ericsson proprietary AVPs (Vendor-Id 193)"
                .to_string(),
            vendor_id: Some(193),
        },
        VendorExtension {
            vendor: "Huawei".to_string(),
            protocol: Protocol::Gtpv2,
            description: "Private extension IEs carrying charging hints"
                .to_string(),
            vendor_id: Some(2011),
        },
        VendorExtension {
            vendor: "Nokia".to_string(),
            protocol: Protocol::Pfcp,
            description: "Enterprise IEs in the reserved 32768+ type range"
                .to_string(),
            vendor_id: Some(94),
        },
    ]
}
