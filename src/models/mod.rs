// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod flow;
pub mod identifier;
pub mod issue;
pub mod message;
pub mod packet;
pub mod session;

pub use flow::{
    CapturedFlow, DeviationKind, DeviationSeverity, FlowDeviation, FlowResult,
    StepOutcome,
};
pub use identifier::{
    IdentifierBinding, IdentifierKey, IdentifierType, identifiers_of,
};
pub use issue::{Issue, IssueCategory, IssueSeverity};
pub use message::{
    CorrelationKeys, Direction, Endpoint, Message, MessageBuilder,
    MessageResult, NodeType, Protocol,
};
pub use packet::{FiveTuple, Packet, TransportProto};
pub use session::{
    LocationUpdate, Session, SessionKind, SessionMetrics, SessionStatus,
};
