// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Built-in error/cause-code dictionary.
//!
//! One entry per `(protocol, code)` pair the analysis rules and the decoders
//! care about. Kept as plain constructors so the tables read like the 3GPP
//! documents they were lifted from.

use serde::{Deserialize, Serialize};

use crate::models::{issue::IssueSeverity, message::Protocol};

/// Catalog entry describing one protocol error/cause code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCodeEntry {
    pub protocol: Protocol,
    pub code: u32,
    /// Canonical standards name, e.g. `DIAMETER_ERROR_USER_UNKNOWN`.
    pub name: String,
    pub severity: IssueSeverity,
    pub description: String,
    pub common_causes: Vec<String>,
    pub recommendations: Vec<String>,
    /// e.g. "3GPP TS 29.272 Section 7.4.3"
    pub standard_ref: String,
}

fn entry(
    protocol: Protocol,
    code: u32,
    name: &str,
    severity: IssueSeverity,
    description: &str,
    causes: &[&str],
    recommendations: &[&str],
    standard_ref: &str,
) -> ErrorCodeEntry {
    ErrorCodeEntry {
        protocol,
        code,
        name: name.to_string(),
        severity,
        description: description.to_string(),
        common_causes: causes.iter().map(|s| s.to_string()).collect(),
        recommendations: recommendations.iter().map(|s| s.to_string()).collect(),
        standard_ref: standard_ref.to_string(),
    }
}

/// The embedded dataset. A config-provided YAML supplement may extend or
/// override these entries at load time.
pub fn builtin_error_codes() -> Vec<ErrorCodeEntry> {
    use IssueSeverity::{Critical, Major, Minor, Warning};
    use Protocol::{Diameter, Gtpv1, Gtpv2, Map, Nas, Pfcp};

    vec![
        // ── Diameter result codes (RFC 6733 + S6a experimental) ──────────
        entry(
            Diameter,
            2001,
            "DIAMETER_SUCCESS",
            Minor,
            "Request was processed successfully.",
            &[],
            &[],
            "RFC 6733 Section 7.1.2",
        ),
        entry(
            Diameter,
            3002,
            "DIAMETER_UNABLE_TO_DELIVER",
            Major,
            "No route to the destination realm or peer.",
            &["Peer table misconfiguration", "Destination host down"],
            &[
                "Verify realm routing table entries",
                "Check transport connectivity towards the destination host",
            ],
            "RFC 6733 Section 7.1.3",
        ),
        entry(
            Diameter,
            4181,
            "DIAMETER_AUTHENTICATION_DATA_UNAVAILABLE",
            Critical,
            "The HSS could not provide authentication vectors for the \
             subscriber.",
            &[
                "AuC keys missing or corrupt for the IMSI",
                "HSS overload shedding vector generation",
            ],
            &[
                "Verify subscriber key material in the AuC",
                "Check HSS load and vector pre-generation queues",
                "Re-provision the subscription if keys were lost",
            ],
            "3GPP TS 29.272 Section 7.4.4",
        ),
        entry(
            Diameter,
            5001,
            "DIAMETER_ERROR_USER_UNKNOWN",
            Major,
            "The subscriber identified by the IMSI is not known in the HSS.",
            &[
                "IMSI not provisioned",
                "Subscription removed or migrated",
                "IMSI digits corrupted on the radio leg",
            ],
            &[
                "Confirm the IMSI exists in subscriber provisioning",
                "Check recent provisioning deletions or migrations",
                "Correlate with the VLR/MME identity request trail",
            ],
            "3GPP TS 29.272 Section 7.4.3",
        ),
        entry(
            Diameter,
            5003,
            "DIAMETER_AUTHORIZATION_REJECTED",
            Major,
            "The subscriber is not authorized for the requested service.",
            &["Missing service subscription", "Barring active"],
            &["Review the subscription profile and barring flags"],
            "RFC 6733 Section 7.1.5",
        ),
        entry(
            Diameter,
            5004,
            "DIAMETER_ERROR_ROAMING_NOT_ALLOWED",
            Major,
            "The subscriber is not permitted to roam in the visited PLMN.",
            &[
                "Roaming agreement missing for the visited PLMN",
                "ODB (operator determined barring) active",
            ],
            &[
                "Check roaming agreements against the Visited-PLMN-Id",
                "Inspect ODB settings for the subscriber",
            ],
            "3GPP TS 29.272 Section 7.4.3",
        ),
        entry(
            Diameter,
            5012,
            "DIAMETER_ERROR_RAT_NOT_ALLOWED",
            Major,
            "The radio access technology in use is not allowed for this \
             subscription.",
            &[
                "Subscription restricted to 2G/3G while UE attached via LTE",
                "RAT restriction misprovisioned",
            ],
            &[
                "Review RAT restrictions in the HSS subscription profile",
                "Verify MME-advertised RAT type in the ULR",
            ],
            "3GPP TS 29.272 Section 7.4.3",
        ),
        entry(
            Diameter,
            5420,
            "DIAMETER_ERROR_UNKNOWN_EPS_SUBSCRIPTION",
            Major,
            "No EPS subscription data exists for the subscriber.",
            &["EPS profile never provisioned"],
            &["Provision APN configuration for the subscriber"],
            "3GPP TS 29.272 Section 7.4.3",
        ),
        entry(
            Diameter,
            5421,
            "DIAMETER_ERROR_RAT_TYPE_NOT_ALLOWED",
            Major,
            "The RAT type is barred for the target APN.",
            &["Per-APN RAT restriction"],
            &["Review APN level RAT restrictions"],
            "3GPP TS 29.272 Section 7.4.3",
        ),
        // ── GTPv2 cause values (TS 29.274 Table 8.4-1) ───────────────────
        entry(
            Gtpv2,
            16,
            "Request accepted",
            Minor,
            "The request was accepted by the peer node.",
            &[],
            &[],
            "3GPP TS 29.274 Section 8.4",
        ),
        entry(
            Gtpv2,
            64,
            "Context not found",
            Major,
            "The peer has no context matching the TEID in the request.",
            &[
                "Stale TEID after SGW/PGW restart",
                "Path failure cleanup removed the context",
                "TEID corruption in transit",
            ],
            &[
                "Check for recent SGW/PGW restarts (restart counter changes)",
                "Correlate with echo failures on the path",
                "Verify TEID allocation consistency between nodes",
            ],
            "3GPP TS 29.274 Section 8.4",
        ),
        entry(
            Gtpv2,
            67,
            "Missing or unknown APN",
            Major,
            "The APN in the request is not configured on the gateway.",
            &[
                "APN not provisioned on the PGW",
                "APN-OI misconfiguration after DNS change",
                "Subscriber profile carries a stale default APN",
            ],
            &[
                "Verify the APN configuration on the PGW",
                "Check DNS resolution of the APN towards the gateway",
                "Review the default APN in the HSS profile",
            ],
            "3GPP TS 29.274 Section 8.4",
        ),
        entry(
            Gtpv2,
            72,
            "System failure",
            Critical,
            "Internal failure in the peer node while serving the request.",
            &["Software fault", "Resource exhaustion"],
            &["Inspect peer node alarms and software state"],
            "3GPP TS 29.274 Section 8.4",
        ),
        entry(
            Gtpv2,
            73,
            "No resources available",
            Critical,
            "The gateway ran out of resources (bearers, memory, licenses).",
            &[
                "Bearer/license capacity exhausted on SGW or PGW",
                "Traffic surge beyond dimensioning",
            ],
            &[
                "Check gateway capacity counters and license limits",
                "Review dimensioning against busy-hour load",
                "Enable overload control towards the MME if supported",
            ],
            "3GPP TS 29.274 Section 8.4",
        ),
        entry(
            Gtpv2,
            91,
            "No resources available (alias)",
            Critical,
            "Alias code reported by some vendors for resource exhaustion.",
            &["Vendor specific mapping of cause 73"],
            &["Treat identically to cause 73"],
            "3GPP TS 29.274 Section 8.4",
        ),
        entry(
            Gtpv2,
            94,
            "Request rejected",
            Major,
            "Generic rejection without a more specific cause.",
            &["Policy rejection", "Peer misconfiguration"],
            &["Enable detailed cause reporting on the peer if available"],
            "3GPP TS 29.274 Section 8.4",
        ),
        // ── GTPv1 cause values (TS 29.060 Section 7.7.1) ─────────────────
        entry(
            Gtpv1,
            128,
            "Request accepted",
            Minor,
            "The request was accepted by the peer node.",
            &[],
            &[],
            "3GPP TS 29.060 Section 7.7.1",
        ),
        entry(
            Gtpv1,
            199,
            "No resources available",
            Critical,
            "The GGSN has no resources to activate the PDP context.",
            &["GGSN capacity exhausted"],
            &["Check GGSN load and APN pool occupancy"],
            "3GPP TS 29.060 Section 7.7.1",
        ),
        entry(
            Gtpv1,
            201,
            "Missing or unknown APN",
            Major,
            "The requested APN is unknown to the GGSN.",
            &["APN not configured"],
            &["Verify APN configuration on the GGSN"],
            "3GPP TS 29.060 Section 7.7.1",
        ),
        entry(
            Gtpv1,
            204,
            "System failure",
            Critical,
            "Internal failure in the peer GSN.",
            &["Software fault"],
            &["Inspect GSN alarms"],
            "3GPP TS 29.060 Section 7.7.1",
        ),
        // ── MAP user errors (TS 29.002) ──────────────────────────────────
        entry(
            Map,
            1,
            "Unknown Subscriber",
            Major,
            "The HLR has no record of the subscriber.",
            &[
                "IMSI not provisioned in the HLR",
                "Subscription deleted while the VLR still holds state",
            ],
            &[
                "Verify subscriber provisioning in the HLR",
                "Purge stale VLR records for the IMSI",
            ],
            "3GPP TS 29.002 Section 17.6.1",
        ),
        entry(
            Map,
            5,
            "Unidentified Subscriber",
            Major,
            "Subscriber identity could not be derived from the request.",
            &["TMSI mapping lost"],
            &["Force an identity request on next contact"],
            "3GPP TS 29.002 Section 17.6.1",
        ),
        entry(
            Map,
            8,
            "Roaming Not Allowed",
            Major,
            "Roaming is barred for this subscriber in the target network.",
            &["No roaming agreement", "ODB roaming barring"],
            &["Check roaming agreements and ODB categories"],
            "3GPP TS 29.002 Section 17.6.1",
        ),
        entry(
            Map,
            9,
            "Illegal Subscriber",
            Critical,
            "Authentication failed; the subscriber was marked illegal.",
            &["Authentication failure", "Cloned SIM suspicion"],
            &["Audit authentication logs for the IMSI"],
            "3GPP TS 29.002 Section 17.6.1",
        ),
        entry(
            Map,
            13,
            "Call Barred",
            Minor,
            "The requested call is barred by supplementary services.",
            &["Subscriber activated barring"],
            &["Review active call barring supplementary services"],
            "3GPP TS 29.002 Section 17.6.1",
        ),
        entry(
            Map,
            27,
            "Absent Subscriber",
            Minor,
            "The subscriber is currently not reachable.",
            &["UE detached or out of coverage", "Purged from the VLR"],
            &[
                "No action usually required",
                "Check paging failure counters if persistent",
            ],
            "3GPP TS 29.002 Section 17.6.1",
        ),
        entry(
            Map,
            34,
            "System Failure",
            Critical,
            "A network node failed while processing the MAP operation.",
            &[
                "HLR/VLR internal fault",
                "Congestion in the signaling network",
                "Timeout of a backend query mapped to system failure",
            ],
            &[
                "Inspect HLR and VLR alarms around the failure window",
                "Check SS7/Sigtran link utilization and congestion",
                "Correlate with other subscribers hitting the same node",
            ],
            "3GPP TS 29.002 Section 17.6.1",
        ),
        entry(
            Map,
            35,
            "Data Missing",
            Major,
            "A mandatory parameter was absent from the MAP operation.",
            &["Interworking fault between vendors"],
            &["Capture and compare against TS 29.002 ASN.1 definitions"],
            "3GPP TS 29.002 Section 17.6.1",
        ),
        entry(
            Map,
            36,
            "Unexpected Data Value",
            Major,
            "A parameter carried a value outside the agreed range.",
            &["Vendor encoding deviation"],
            &["Compare the offending parameter against the standard"],
            "3GPP TS 29.002 Section 17.6.1",
        ),
        // ── NAS EMM causes (TS 24.301 Annex A) ───────────────────────────
        entry(
            Nas,
            3,
            "Illegal UE",
            Critical,
            "The UE failed identity or authentication checks.",
            &["Authentication failure", "Blacklisted IMEI"],
            &["Check EIR status for the IMEI", "Audit authentication logs"],
            "3GPP TS 24.301 Annex A",
        ),
        entry(
            Nas,
            6,
            "Illegal ME",
            Critical,
            "The mobile equipment is blacklisted.",
            &["IMEI on the EIR blacklist"],
            &["Verify the EIR entry for the IMEI"],
            "3GPP TS 24.301 Annex A",
        ),
        entry(
            Nas,
            7,
            "EPS services not allowed",
            Major,
            "The subscriber may not use EPS services.",
            &["Subscription without EPS service"],
            &["Review the subscription service set"],
            "3GPP TS 24.301 Annex A",
        ),
        entry(
            Nas,
            11,
            "PLMN not allowed",
            Major,
            "The UE attempted to register in a PLMN it may not use.",
            &[
                "No roaming agreement with the selected PLMN",
                "Forbidden PLMN list out of date in the UE",
            ],
            &[
                "Check roaming agreements for the PLMN pair",
                "Verify steering-of-roaming configuration",
            ],
            "3GPP TS 24.301 Annex A",
        ),
        entry(
            Nas,
            15,
            "No suitable cells in tracking area",
            Minor,
            "The tracking area has no cells the UE may camp on.",
            &["Coverage hole", "TAC misconfiguration"],
            &["Review cell TAC assignments in the area"],
            "3GPP TS 24.301 Annex A",
        ),
        entry(
            Nas,
            19,
            "ESM failure",
            Major,
            "The session management part of the attach failed.",
            &["Default bearer setup failure"],
            &["Correlate with the GTP Create Session exchange"],
            "3GPP TS 24.301 Annex A",
        ),
        entry(
            Nas,
            22,
            "Congestion",
            Major,
            "The network rejected the request due to congestion.",
            &["MME overload", "Access barring active"],
            &["Check MME load and overload actions"],
            "3GPP TS 24.301 Annex A",
        ),
        // ── PFCP cause values (TS 29.244 Section 8.2.1) ──────────────────
        entry(
            Pfcp,
            1,
            "Request accepted",
            Minor,
            "The request was accepted by the peer function.",
            &[],
            &[],
            "3GPP TS 29.244 Section 8.2.1",
        ),
        entry(
            Pfcp,
            64,
            "Request rejected",
            Major,
            "Generic PFCP rejection.",
            &["Unspecified peer-side failure"],
            &["Enable verbose cause reporting on the UPF"],
            "3GPP TS 29.244 Section 8.2.1",
        ),
        entry(
            Pfcp,
            65,
            "Session context not found",
            Major,
            "The UPF has no session matching the SEID.",
            &["UPF restart lost session state", "SEID mismatch"],
            &[
                "Check UPF recovery timestamps",
                "Audit SMF/UPF SEID allocation",
            ],
            "3GPP TS 29.244 Section 8.2.1",
        ),
        entry(
            Pfcp,
            66,
            "Mandatory IE missing",
            Major,
            "A mandatory information element was absent.",
            &["Vendor interworking fault"],
            &["Compare the request against TS 29.244 IE tables"],
            "3GPP TS 29.244 Section 8.2.1",
        ),
        entry(
            Pfcp,
            69,
            "No resources available",
            Critical,
            "The UPF has no resources for the new session.",
            &["UPF capacity exhausted"],
            &["Check UPF session counts against dimensioning"],
            "3GPP TS 29.244 Section 8.2.1",
        ),
        entry(
            Pfcp,
            70,
            "Service not supported",
            Warning,
            "The peer does not support a requested feature.",
            &["Feature flag mismatch between SMF and UPF"],
            &["Align UP function features on both sides"],
            "3GPP TS 29.244 Section 8.2.1",
        ),
    ]
}
