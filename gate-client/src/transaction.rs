use crate::error::{NodeFailure, Phase, TransactionError};

use std::fmt;
use std::time::Duration;

use gate_common::{
    Endorsement, NodeId, OrderingStatus, SignedProposal, TransactionId, ValidationCode, OK_STATUS,
};

/// One entry per requested endorser; failures are recorded, never dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndorsementResponse {
    pub node: NodeId,
    pub status: u32,
    pub message: String,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    pub error: Option<String>,
}

impl EndorsementResponse {
    pub fn failed(node: NodeId, error: impl Into<String>) -> Self {
        Self {
            node,
            status: 0,
            message: String::new(),
            payload: Vec::new(),
            signature: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.status == OK_STATUS
    }

    pub fn dissent(&self) -> Option<NodeFailure> {
        if let Some(error) = &self.error {
            return Some(NodeFailure::new(self.node.clone(), error.clone()));
        }
        if self.status != OK_STATUS {
            let reason = if self.message.is_empty() {
                format!("status {}", self.status)
            } else {
                format!("status {}: {}", self.status, self.message)
            };
            return Some(NodeFailure::new(self.node.clone(), reason));
        }
        None
    }
}

impl From<Endorsement> for EndorsementResponse {
    fn from(endorsement: Endorsement) -> Self {
        Self {
            node: endorsement.endorser,
            status: endorsement.status,
            message: endorsement.message,
            payload: endorsement.payload,
            signature: endorsement.signature,
            error: None,
        }
    }
}

impl From<&EndorsementResponse> for Endorsement {
    fn from(response: &EndorsementResponse) -> Self {
        Self {
            endorser: response.node.clone(),
            status: response.status,
            message: response.message.clone(),
            payload: response.payload.clone(),
            signature: response.signature.clone(),
        }
    }
}

/// A unanimously endorsed proposal, ready for ordering.
#[derive(Debug)]
pub struct CombinedEndorsement {
    proposal: SignedProposal,
    responses: Vec<EndorsementResponse>,
}

impl CombinedEndorsement {
    pub(crate) fn new(proposal: SignedProposal, responses: Vec<EndorsementResponse>) -> Self {
        Self {
            proposal,
            responses,
        }
    }

    pub fn tx_id(&self) -> &TransactionId {
        &self.proposal.proposal.tx_id
    }

    pub fn proposal(&self) -> &SignedProposal {
        &self.proposal
    }

    pub fn responses(&self) -> &[EndorsementResponse] {
        &self.responses
    }

    pub fn payload(&self) -> &[u8] {
        self.responses
            .first()
            .map(|r| r.payload.as_slice())
            .unwrap_or_default()
    }

    pub fn endorsements(&self) -> Vec<Endorsement> {
        self.responses.iter().map(Endorsement::from).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderingAck {
    pub status: OrderingStatus,
    pub info: String,
}

impl OrderingAck {
    pub fn is_accepted(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitFailure {
    Timeout(Duration),
    Invalid(ValidationCode),
    Unreachable(String),
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitFailure::Timeout(after) => write!(f, "REQUEST_TIMEOUT after {after:?}"),
            CommitFailure::Invalid(code) => write!(f, "invalid, code: {code}"),
            CommitFailure::Unreachable(reason) => write!(f, "event hub unreachable: {reason}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitOutcome {
    pub node: NodeId,
    pub code: Option<ValidationCode>,
    pub failure: Option<CommitFailure>,
}

impl CommitOutcome {
    pub fn committed(node: NodeId, code: ValidationCode) -> Self {
        let failure = (!code.is_valid()).then(|| CommitFailure::Invalid(code.clone()));
        Self {
            node,
            code: Some(code),
            failure,
        }
    }

    pub fn failed(node: NodeId, failure: CommitFailure) -> Self {
        Self {
            node,
            code: None,
            failure: Some(failure),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.failure.is_none() && self.code.as_ref().map_or(false, ValidationCode::is_valid)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionResult {
    tx_id: TransactionId,
    ordering: OrderingAck,
    outcomes: Vec<CommitOutcome>,
    payload: Vec<u8>,
    success: bool,
}

impl TransactionResult {
    pub fn new(
        tx_id: TransactionId,
        ordering: OrderingAck,
        outcomes: Vec<CommitOutcome>,
        payload: Vec<u8>,
    ) -> Self {
        let success = ordering.is_accepted() && outcomes.iter().all(CommitOutcome::is_valid);
        Self {
            tx_id,
            ordering,
            outcomes,
            payload,
            success,
        }
    }

    pub fn tx_id(&self) -> &TransactionId {
        &self.tx_id
    }

    pub fn ordering(&self) -> &OrderingAck {
        &self.ordering
    }

    pub fn outcomes(&self) -> &[CommitOutcome] {
        &self.outcomes
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// Turns a non-successful result into the matching typed failure,
    /// keeping the full result attached for per-node inspection.
    pub fn into_checked(self) -> Result<Self, TransactionError> {
        if self.success {
            return Ok(self);
        }
        if !self.ordering.is_accepted() {
            return Err(TransactionError::OrderingRejected {
                tx_id: self.tx_id.clone(),
                phase: Phase::Ordering,
                status: Some(self.ordering.status),
                info: self.ordering.info.clone(),
            });
        }
        let invalid: Vec<NodeFailure> = self
            .outcomes
            .iter()
            .filter_map(|o| match &o.failure {
                Some(failure @ CommitFailure::Invalid(_)) => {
                    Some(NodeFailure::new(o.node.clone(), failure.to_string()))
                }
                _ => None,
            })
            .collect();
        if !invalid.is_empty() {
            return Err(TransactionError::ConfirmationInvalid {
                tx_id: self.tx_id.clone(),
                phase: Phase::Confirming,
                failures: invalid,
                result: Box::new(self),
            });
        }
        let silent: Vec<NodeFailure> = self
            .outcomes
            .iter()
            .filter_map(|o| {
                o.failure
                    .as_ref()
                    .map(|failure| NodeFailure::new(o.node.clone(), failure.to_string()))
            })
            .collect();
        Err(TransactionError::ConfirmationTimeout {
            tx_id: self.tx_id.clone(),
            phase: Phase::Confirming,
            failures: silent,
            result: Box::new(self),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryResult {
    pub tx_id: TransactionId,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod transaction_test {
    use super::*;

    fn accepted() -> OrderingAck {
        OrderingAck {
            status: OrderingStatus::Success,
            info: String::new(),
        }
    }

    fn tx_id() -> TransactionId {
        TransactionId::derive(b"nonce", &[0; 32])
    }

    #[test]
    fn success_requires_every_node_valid() {
        let ok = TransactionResult::new(
            tx_id(),
            accepted(),
            vec![
                CommitOutcome::committed("peer0".into(), ValidationCode::Valid),
                CommitOutcome::committed("peer1".into(), ValidationCode::Valid),
            ],
            b"done".to_vec(),
        );
        assert!(ok.success());
        assert!(ok.into_checked().is_ok());

        let partial = TransactionResult::new(
            tx_id(),
            accepted(),
            vec![
                CommitOutcome::committed("peer0".into(), ValidationCode::Valid),
                CommitOutcome::committed("peer1".into(), ValidationCode::MvccReadConflict),
            ],
            Vec::new(),
        );
        assert!(!partial.success());
        match partial.into_checked() {
            Err(TransactionError::ConfirmationInvalid { failures, result, .. }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].node, NodeId::from("peer1"));
                assert!(!result.success());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ordering_rejection_wins_over_valid_commits() {
        let result = TransactionResult::new(
            tx_id(),
            OrderingAck {
                status: OrderingStatus::BadRequest,
                info: "duplicate".to_string(),
            },
            vec![CommitOutcome::committed("peer0".into(), ValidationCode::Valid)],
            Vec::new(),
        );
        assert!(!result.success());
        assert!(matches!(
            result.into_checked(),
            Err(TransactionError::OrderingRejected { .. })
        ));
    }

    #[test]
    fn dissent_names_status_and_error() {
        let bad = EndorsementResponse {
            node: "peer1".into(),
            status: 500,
            message: "chaincode panicked".to_string(),
            payload: Vec::new(),
            signature: Vec::new(),
            error: None,
        };
        let dissent = bad.dissent().unwrap();
        assert_eq!(dissent.reason, "status 500: chaincode panicked");

        let unreachable = EndorsementResponse::failed("peer2".into(), "connection refused");
        assert!(!unreachable.is_ok());
        assert_eq!(unreachable.dissent().unwrap().reason, "connection refused");
    }
}
