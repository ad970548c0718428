use std::sync::Arc;

use sigmon_rs::{
    decoders::{self, DecodeError},
    kb::KnowledgeBase,
    models::message::Protocol,
};

use super::{sctp_packet, udp_packet};

fn kb() -> Arc<KnowledgeBase> {
    Arc::new(KnowledgeBase::load(None).expect("kb"))
}

#[test]
fn full_registry_registers_everything() {
    let registry = decoders::build_registry(&Protocol::ALL, &kb());
    assert_eq!(registry.len(), 11);
}

#[test]
fn dispatch_is_first_match() {
    let registry = decoders::build_registry(&Protocol::ALL, &kb());

    // A GTPv1 header on the PFCP port: PFCP is registered first but must
    // not claim a payload with the PT bit set.
    let gtpv1 = vec![0x30, 1, 0, 0, 0, 0, 0, 0];
    let msg = registry.decode(&udp_packet(gtpv1, 8805, 8805)).expect("decode");
    assert_eq!(msg.protocol, Protocol::Gtpv1);

    let pfcp = vec![0x20, 1, 0, 4, 0, 0, 1, 0];
    let msg = registry.decode(&udp_packet(pfcp, 8805, 8805)).expect("decode");
    assert_eq!(msg.protocol, Protocol::Pfcp);
}

#[test]
fn disabled_protocols_are_not_registered() {
    let registry =
        decoders::build_registry(&[Protocol::Diameter], &kb());
    assert_eq!(registry.len(), 1);

    let pfcp = vec![0x20, 1, 0, 4, 0, 0, 1, 0];
    let err = registry
        .decode(&udp_packet(pfcp, 8805, 8805))
        .expect_err("must not decode");
    assert!(matches!(err, DecodeError::NoDecoderClaim));
}

#[test]
fn garbage_is_counted_not_crashed() {
    let registry = decoders::build_registry(&Protocol::ALL, &kb());
    let err = registry
        .decode(&sctp_packet(vec![0xFF; 64], 7777, 7777))
        .expect_err("nothing claims this");
    assert!(matches!(err, DecodeError::NoDecoderClaim));
}
