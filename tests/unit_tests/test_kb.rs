use sigmon_rs::{
    kb::KnowledgeBase,
    models::{issue::IssueSeverity, message::Protocol},
};

#[test]
fn rule_codes_are_all_catalogued() {
    let kb = KnowledgeBase::load(None).expect("kb");
    for (protocol, code) in [
        (Protocol::Diameter, 5001),
        (Protocol::Diameter, 5004),
        (Protocol::Diameter, 5012),
        (Protocol::Diameter, 4181),
        (Protocol::Gtpv2, 64),
        (Protocol::Gtpv2, 67),
        (Protocol::Gtpv2, 73),
        (Protocol::Gtpv2, 91),
        (Protocol::Map, 1),
        (Protocol::Map, 34),
        (Protocol::Nas, 11),
    ] {
        let entry = kb
            .error_code(protocol, code)
            .unwrap_or_else(|| panic!("missing {protocol} {code}"));
        assert!(!entry.name.is_empty());
        assert!(!entry.standard_ref.is_empty());
        assert!(
            !entry.recommendations.is_empty(),
            "{protocol} {code} needs recommendations"
        );
    }
}

#[test]
fn severity_of_known_entries() {
    let kb = KnowledgeBase::load(None).expect("kb");
    assert_eq!(
        kb.error_code(Protocol::Diameter, 4181).expect("entry").severity,
        IssueSeverity::Critical
    );
    assert_eq!(
        kb.error_code(Protocol::Map, 27).expect("entry").severity,
        IssueSeverity::Minor
    );
}

#[test]
fn procedures_are_indexed_by_protocol() {
    let kb = KnowledgeBase::load(None).expect("kb");
    let nas_procs = kb.procedures(Protocol::Nas);
    assert!(
        nas_procs.iter().any(|p| p.name == "4G Attach Procedure"),
        "attach procedure must be reachable through NAS"
    );
    assert!(
        kb.procedures(Protocol::Pfcp)
            .iter()
            .any(|p| p.name == "5G PDU Session Establishment")
    );
    assert!(kb.procedure_by_name("MAP Update Location").is_some());
}

#[test]
fn search_exact_then_substring() {
    let kb = KnowledgeBase::load(None).expect("kb");

    let exact = kb.search("TS 29.272");
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0]["kind"], "standard");

    let fuzzy = kb.search("roaming");
    assert!(fuzzy.len() >= 2, "roaming matches multiple entries");

    assert!(kb.search("nonexistent-gibberish").is_empty());
}

#[test]
fn supplement_extends_the_dataset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("supplement.yaml");
    std::fs::write(
        &path,
        r#"
error_codes:
  - protocol: diameter
    code: 5030
    name: DIAMETER_ERROR_USER_NO_NON_3GPP_SUBSCRIPTION
    severity: major
    description: Subscriber has no non-3GPP subscription.
    common_causes: []
    recommendations: ["Provision a non-3GPP subscription"]
    standard_ref: 3GPP TS 29.273 Section 8.1.2.3
"#,
    )
    .expect("write supplement");

    let kb = KnowledgeBase::load(Some(&path)).expect("kb");
    let entry = kb.error_code(Protocol::Diameter, 5030).expect("entry");
    assert_eq!(entry.name, "DIAMETER_ERROR_USER_NO_NON_3GPP_SUBSCRIPTION");
}

#[test]
fn malformed_supplement_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.yaml");
    std::fs::write(&path, "error_codes: {not: [a, list}").expect("write");
    assert!(KnowledgeBase::load(Some(&path)).is_err());
}
