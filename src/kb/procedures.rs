// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Standard 3GPP procedure templates used by the flow reconstructor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::message::Protocol;

/// Network generation a procedure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Generation {
    G2,
    G3,
    G4,
    G5,
}

/// One expected message inside a procedure template.
///
/// Optional steps may legitimately be absent from a capture (cached
/// authentication vectors, combined attach variants); only mandatory steps
/// count towards completeness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcStep {
    pub name: String,
    pub protocol: Protocol,
    pub message: String,
    pub mandatory: bool,
    /// IEs a conformant message is expected to carry.
    pub expected_ies: Vec<String>,
    /// Expected completion delay from the previous step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<Duration>,
}

/// Success/failure path variant of a procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcVariant {
    pub name: String,
    pub description: String,
}

/// A standard call/registration/session flow, ordered steps first to last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureTemplate {
    pub name: String,
    pub standard_ref: String,
    pub generation: Generation,
    pub steps: Vec<ProcStep>,
    pub variants: Vec<ProcVariant>,
}

impl ProcedureTemplate {
    pub fn mandatory_count(&self) -> usize {
        self.steps.iter().filter(|s| s.mandatory).count()
    }

    /// Protocols whose messages this template can match.
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut out: Vec<Protocol> = Vec::new();
        for s in &self.steps {
            if !out.contains(&s.protocol) {
                out.push(s.protocol);
            }
        }
        out
    }
}

fn step(
    name: &str,
    protocol: Protocol,
    message: &str,
    mandatory: bool,
    ies: &[&str],
) -> ProcStep {
    ProcStep {
        name: name.to_string(),
        protocol,
        message: message.to_string(),
        mandatory,
        expected_ies: ies.iter().map(|s| s.to_string()).collect(),
        max_delay: Some(Duration::from_secs(5)),
    }
}

fn variant(name: &str, description: &str) -> ProcVariant {
    ProcVariant {
        name: name.to_string(),
        description: description.to_string(),
    }
}

/// The embedded procedure catalog.
pub fn builtin_procedures() -> Vec<ProcedureTemplate> {
    use Protocol::{Diameter, Gtpv2, Http2, Map, Nas, Ngap, Pfcp, S1ap};

    vec![
        // The authentication and update-location legs are optional: an MME
        // holding cached vectors and fresh location state skips them.
        ProcedureTemplate {
            name: "4G Attach Procedure".to_string(),
            standard_ref: "3GPP TS 23.401 Section 5.3.2".to_string(),
            generation: Generation::G4,
            steps: vec![
                step(
                    "attach-request",
                    Nas,
                    "Attach Request",
                    true,
                    &["EPS mobile identity", "UE network capability"],
                ),
                step(
                    "auth-info-request",
                    Diameter,
                    "Authentication-Information-Request",
                    false,
                    &["User-Name", "Visited-PLMN-Id"],
                ),
                step(
                    "auth-info-answer",
                    Diameter,
                    "Authentication-Information-Answer",
                    false,
                    &["Result-Code", "Authentication-Info"],
                ),
                step(
                    "nas-auth-request",
                    Nas,
                    "Authentication Request",
                    false,
                    &["RAND", "AUTN"],
                ),
                step(
                    "nas-auth-response",
                    Nas,
                    "Authentication Response",
                    false,
                    &["RES"],
                ),
                step(
                    "update-location-request",
                    Diameter,
                    "Update-Location-Request",
                    false,
                    &["User-Name", "Visited-PLMN-Id", "RAT-Type"],
                ),
                step(
                    "update-location-answer",
                    Diameter,
                    "Update-Location-Answer",
                    false,
                    &["Result-Code", "Subscription-Data"],
                ),
                step(
                    "create-session-request",
                    Gtpv2,
                    "Create Session Request",
                    true,
                    &["IMSI", "APN", "F-TEID"],
                ),
                step(
                    "create-session-response",
                    Gtpv2,
                    "Create Session Response",
                    true,
                    &["Cause", "F-TEID", "PDN Address Allocation"],
                ),
                step(
                    "initial-context-setup-request",
                    S1ap,
                    "Initial Context Setup Request",
                    true,
                    &["UE-AMBR", "E-RAB to be setup"],
                ),
                step(
                    "initial-context-setup-response",
                    S1ap,
                    "Initial Context Setup Response",
                    false,
                    &["E-RAB setup list"],
                ),
                step(
                    "attach-accept",
                    Nas,
                    "Attach Accept",
                    true,
                    &["GUTI", "TAI list"],
                ),
                step(
                    "attach-complete",
                    Nas,
                    "Attach Complete",
                    true,
                    &["Activate default EPS bearer context accept"],
                ),
            ],
            variants: vec![
                variant("success", "All mandatory steps complete in order"),
                variant(
                    "auth-failure",
                    "Attach Reject after a failed authentication exchange",
                ),
                variant(
                    "bearer-failure",
                    "Create Session rejected, attach aborted",
                ),
            ],
        },
        ProcedureTemplate {
            name: "4G Detach Procedure".to_string(),
            standard_ref: "3GPP TS 23.401 Section 5.3.8".to_string(),
            generation: Generation::G4,
            steps: vec![
                step(
                    "detach-request",
                    Nas,
                    "Detach Request",
                    true,
                    &["EPS mobile identity", "Detach type"],
                ),
                step(
                    "delete-session-request",
                    Gtpv2,
                    "Delete Session Request",
                    true,
                    &["EPS Bearer ID"],
                ),
                step(
                    "delete-session-response",
                    Gtpv2,
                    "Delete Session Response",
                    true,
                    &["Cause"],
                ),
                step("detach-accept", Nas, "Detach Accept", false, &[]),
                step(
                    "ue-context-release",
                    S1ap,
                    "UE Context Release Command",
                    false,
                    &["Cause"],
                ),
            ],
            variants: vec![variant("success", "Bearers torn down, UE released")],
        },
        ProcedureTemplate {
            name: "5G Registration Procedure".to_string(),
            standard_ref: "3GPP TS 23.502 Section 4.2.2.2".to_string(),
            generation: Generation::G5,
            steps: vec![
                step(
                    "registration-request",
                    Nas,
                    "Registration Request",
                    true,
                    &["5GS mobile identity", "UE security capability"],
                ),
                step(
                    "nas-auth-request",
                    Nas,
                    "Authentication Request",
                    false,
                    &["RAND", "AUTN"],
                ),
                step(
                    "nas-auth-response",
                    Nas,
                    "Authentication Response",
                    false,
                    &["RES*"],
                ),
                step(
                    "uecm-registration",
                    Http2,
                    "PUT /nudm-uecm registration",
                    false,
                    &["amfInstanceId"],
                ),
                step(
                    "sdm-get",
                    Http2,
                    "GET /nudm-sdm subscription data",
                    false,
                    &[],
                ),
                step(
                    "initial-context-setup-request",
                    Ngap,
                    "Initial Context Setup Request",
                    true,
                    &["GUAMI", "AMF-UE-NGAP-ID"],
                ),
                step(
                    "initial-context-setup-response",
                    Ngap,
                    "Initial Context Setup Response",
                    false,
                    &[],
                ),
                step(
                    "registration-accept",
                    Nas,
                    "Registration Accept",
                    true,
                    &["5G-GUTI", "TAI list"],
                ),
                step(
                    "registration-complete",
                    Nas,
                    "Registration Complete",
                    true,
                    &[],
                ),
            ],
            variants: vec![
                variant("success", "All mandatory steps complete in order"),
                variant("rejected", "Registration Reject with a 5GMM cause"),
            ],
        },
        ProcedureTemplate {
            name: "5G PDU Session Establishment".to_string(),
            standard_ref: "3GPP TS 23.502 Section 4.3.2.2".to_string(),
            generation: Generation::G5,
            steps: vec![
                step(
                    "pdu-session-request",
                    Nas,
                    "PDU Session Establishment Request",
                    true,
                    &["PDU session ID", "DNN"],
                ),
                step(
                    "smf-create-sm-context",
                    Http2,
                    "POST /nsmf-pdusession sm-contexts",
                    false,
                    &["supi", "dnn"],
                ),
                step(
                    "pfcp-establishment-request",
                    Pfcp,
                    "Session Establishment Request",
                    true,
                    &["F-SEID", "PDR", "FAR"],
                ),
                step(
                    "pfcp-establishment-response",
                    Pfcp,
                    "Session Establishment Response",
                    true,
                    &["Cause", "F-SEID"],
                ),
                step(
                    "pdu-session-accept",
                    Nas,
                    "PDU Session Establishment Accept",
                    true,
                    &["PDU address", "QoS rules"],
                ),
            ],
            variants: vec![
                variant("success", "User plane established"),
                variant("upf-failure", "PFCP establishment rejected"),
            ],
        },
        ProcedureTemplate {
            name: "MAP Update Location".to_string(),
            standard_ref: "3GPP TS 29.002 Section 8.1.2".to_string(),
            generation: Generation::G3,
            steps: vec![
                step(
                    "update-location-invoke",
                    Map,
                    "updateLocation",
                    true,
                    &["IMSI", "MSC address", "VLR number"],
                ),
                step(
                    "insert-subscriber-data",
                    Map,
                    "insertSubscriberData",
                    false,
                    &["Subscriber data"],
                ),
                step(
                    "update-location-result",
                    Map,
                    "updateLocation result",
                    true,
                    &["HLR number"],
                ),
            ],
            variants: vec![
                variant("success", "Location updated in the HLR"),
                variant("unknown-subscriber", "HLR returns Unknown Subscriber"),
            ],
        },
        ProcedureTemplate {
            name: "GTP Session Establishment".to_string(),
            standard_ref: "3GPP TS 29.274 Section 7.2.1".to_string(),
            generation: Generation::G4,
            steps: vec![
                step(
                    "create-session-request",
                    Gtpv2,
                    "Create Session Request",
                    true,
                    &["IMSI", "APN", "F-TEID"],
                ),
                step(
                    "create-session-response",
                    Gtpv2,
                    "Create Session Response",
                    true,
                    &["Cause", "F-TEID"],
                ),
                step(
                    "modify-bearer-request",
                    Gtpv2,
                    "Modify Bearer Request",
                    false,
                    &["F-TEID"],
                ),
                step(
                    "modify-bearer-response",
                    Gtpv2,
                    "Modify Bearer Response",
                    false,
                    &["Cause"],
                ),
            ],
            variants: vec![variant("success", "Default bearer established")],
        },
    ]
}
