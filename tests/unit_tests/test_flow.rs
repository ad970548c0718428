use std::sync::Arc;

use bytes::Bytes;
use sigmon_rs::{
    flow,
    kb::KnowledgeBase,
    models::{
        flow::{DeviationKind, DeviationSeverity, FlowResult},
        message::{Message, Protocol},
        packet::{FiveTuple, TransportProto},
        session::Session,
    },
};

use super::ts;

fn msg(protocol: Protocol, name: &str, offset_secs: i64) -> Arc<Message> {
    Arc::new(
        Message::builder(protocol).message_name(name).build(
            Bytes::new(),
            &FiveTuple::v4(
                [10, 0, 0, 1],
                1000,
                [10, 0, 0, 2],
                2000,
                TransportProto::Udp,
            ),
            ts(offset_secs),
            10,
        ),
    )
}

const ATTACH_SEQUENCE: [(Protocol, &str); 13] = [
    (Protocol::Nas, "Attach Request"),
    (Protocol::Diameter, "Authentication-Information-Request"),
    (Protocol::Diameter, "Authentication-Information-Answer"),
    (Protocol::Nas, "Authentication Request"),
    (Protocol::Nas, "Authentication Response"),
    (Protocol::Diameter, "Update-Location-Request"),
    (Protocol::Diameter, "Update-Location-Answer"),
    (Protocol::Gtpv2, "Create Session Request"),
    (Protocol::Gtpv2, "Create Session Response"),
    (Protocol::S1ap, "Initial Context Setup Request"),
    (Protocol::S1ap, "Initial Context Setup Response"),
    (Protocol::Nas, "Attach Accept"),
    (Protocol::Nas, "Attach Complete"),
];

fn session_of(steps: &[(Protocol, &str)]) -> Session {
    let mut session = Session::new(1, ts(0));
    for (i, (protocol, name)) in steps.iter().enumerate() {
        session.append(msg(*protocol, name, i as i64));
    }
    session
}

#[test]
fn complete_attach_scores_perfect() {
    let kb = KnowledgeBase::load(None).expect("kb");
    let session = session_of(&ATTACH_SEQUENCE);
    let flow = flow::reconstruct(&session, &kb);

    assert_eq!(flow.procedure, "4G Attach Procedure");
    assert_eq!(flow.completeness, 1.0);
    assert_eq!(flow.result, FlowResult::Success);
    assert!(flow.deviations.is_empty(), "got {:?}", flow.deviations);
}

#[test]
fn missing_create_session_pair_fails() {
    let kb = KnowledgeBase::load(None).expect("kb");
    let steps: Vec<_> = ATTACH_SEQUENCE
        .iter()
        .filter(|(_, name)| !name.starts_with("Create Session"))
        .copied()
        .collect();
    let session = session_of(&steps);
    let flow = flow::reconstruct(&session, &kb);

    assert_eq!(flow.procedure, "4G Attach Procedure");
    assert!(flow.completeness <= 0.7, "completeness {}", flow.completeness);
    assert_eq!(flow.result, FlowResult::Failure);

    let critical_missing: Vec<_> = flow
        .deviations
        .iter()
        .filter(|d| {
            d.kind == DeviationKind::MissingStep
                && d.severity == DeviationSeverity::Critical
        })
        .collect();
    assert_eq!(critical_missing.len(), 2);
}

#[test]
fn unknown_when_nothing_matches() {
    let kb = KnowledgeBase::load(None).expect("kb");
    let session = session_of(&[(Protocol::Pfcp, "Heartbeat Request")]);
    let flow = flow::reconstruct(&session, &kb);
    assert_eq!(flow.procedure, "Unknown");
    assert_eq!(flow.completeness, 0.0);
}

#[test]
fn late_step_is_a_timeout_deviation() {
    let kb = KnowledgeBase::load(None).expect("kb");
    let mut session = Session::new(1, ts(0));
    session.append(msg(Protocol::Gtpv2, "Create Session Request", 0));
    // Response lands 20 seconds later, far over the 5 second limit.
    session.append(msg(Protocol::Gtpv2, "Create Session Response", 20));
    let flow = flow::reconstruct(&session, &kb);

    assert!(
        flow.deviations
            .iter()
            .any(|d| d.kind == DeviationKind::Timeout
                && d.severity == DeviationSeverity::Major),
        "got {:?}",
        flow.deviations
    );
}

#[test]
fn stray_message_is_minor_unexpected() {
    let kb = KnowledgeBase::load(None).expect("kb");
    let mut steps: Vec<_> = ATTACH_SEQUENCE.to_vec();
    steps.push((Protocol::Pfcp, "Heartbeat Request"));
    let session = session_of(&steps);
    let flow = flow::reconstruct(&session, &kb);

    assert!(
        flow.deviations
            .iter()
            .any(|d| d.kind == DeviationKind::UnexpectedMessage
                && d.severity == DeviationSeverity::Minor)
    );
}
