use crate::transaction::TransactionResult;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use gate_common::{NodeId, OrderingStatus, TransactionId};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Proposing,
    Evaluating,
    Ordering,
    Confirming,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Proposing => "proposing",
            Phase::Evaluating => "evaluating",
            Phase::Ordering => "ordering",
            Phase::Confirming => "confirming",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeFailure {
    pub node: NodeId,
    pub reason: String,
}

impl NodeFailure {
    pub fn new(node: NodeId, reason: impl Into<String>) -> Self {
        Self {
            node,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.node, self.reason)
    }
}

fn format_failures(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(NodeFailure::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("connection closed")]
    Closed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("codec: {0}")]
    Codec(#[from] std::io::Error),
    #[error("remote failure: {0}")]
    Remote(String),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl TransportError {
    /// Whether the call never got through to the node. A node that took the
    /// request but missed the deadline, or answered with an error, was reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect { .. } | TransportError::Closed | TransportError::Codec(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction {tx_id} ({phase}): no endorser reachable: {}", format_failures(.failures))]
    ProposalTransport {
        tx_id: TransactionId,
        phase: Phase,
        failures: Vec<NodeFailure>,
    },
    #[error("transaction {tx_id} ({phase}): endorsement disagreement: {}", format_failures(.dissenters))]
    EndorsementDisagreement {
        tx_id: TransactionId,
        phase: Phase,
        dissenters: Vec<NodeFailure>,
    },
    #[error("transaction {tx_id} ({phase}): ordering rejected{}: {info}", .status.map(|s| format!(" with {s}")).unwrap_or_default())]
    OrderingRejected {
        tx_id: TransactionId,
        phase: Phase,
        status: Option<OrderingStatus>,
        info: String,
    },
    #[error("transaction {tx_id} ({phase}): no commit notification within timeout: {}", format_failures(.failures))]
    ConfirmationTimeout {
        tx_id: TransactionId,
        phase: Phase,
        failures: Vec<NodeFailure>,
        result: Box<TransactionResult>,
    },
    #[error("transaction {tx_id} ({phase}): commit reported invalid: {}", format_failures(.failures))]
    ConfirmationInvalid {
        tx_id: TransactionId,
        phase: Phase,
        failures: Vec<NodeFailure>,
        result: Box<TransactionResult>,
    },
    #[error("transaction {tx_id} ({phase}): already submitted for ordering")]
    DuplicateSubmission { tx_id: TransactionId, phase: Phase },
    #[error("transaction {tx_id} ({phase}): cancelled")]
    Cancelled { tx_id: TransactionId, phase: Phase },
    #[error("session for {org}: {source}")]
    Session {
        org: String,
        #[source]
        source: anyhow::Error,
    },
}

impl TransactionError {
    pub fn tx_id(&self) -> Option<&TransactionId> {
        match self {
            TransactionError::ProposalTransport { tx_id, .. }
            | TransactionError::EndorsementDisagreement { tx_id, .. }
            | TransactionError::OrderingRejected { tx_id, .. }
            | TransactionError::ConfirmationTimeout { tx_id, .. }
            | TransactionError::ConfirmationInvalid { tx_id, .. }
            | TransactionError::DuplicateSubmission { tx_id, .. }
            | TransactionError::Cancelled { tx_id, .. } => Some(tx_id),
            TransactionError::Session { .. } => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            TransactionError::ProposalTransport { phase, .. }
            | TransactionError::EndorsementDisagreement { phase, .. }
            | TransactionError::OrderingRejected { phase, .. }
            | TransactionError::ConfirmationTimeout { phase, .. }
            | TransactionError::ConfirmationInvalid { phase, .. }
            | TransactionError::DuplicateSubmission { phase, .. }
            | TransactionError::Cancelled { phase, .. } => Some(*phase),
            TransactionError::Session { .. } => None,
        }
    }

    pub fn nodes(&self) -> Vec<&NodeId> {
        match self {
            TransactionError::ProposalTransport { failures, .. }
            | TransactionError::ConfirmationTimeout { failures, .. }
            | TransactionError::ConfirmationInvalid { failures, .. } => {
                failures.iter().map(|f| &f.node).collect()
            }
            TransactionError::EndorsementDisagreement { dissenters, .. } => {
                dissenters.iter().map(|f| &f.node).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn result(&self) -> Option<&TransactionResult> {
        match self {
            TransactionError::ConfirmationTimeout { result, .. }
            | TransactionError::ConfirmationInvalid { result, .. } => Some(result.as_ref()),
            _ => None,
        }
    }
}
