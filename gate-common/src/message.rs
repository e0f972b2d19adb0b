use crate::types::{
    Endorsement, Envelope, OrderingStatus, SignedProposal, TransactionId, ValidationCode,
};

use borsh::{BorshDeserialize, BorshSerialize};

pub type RequestId = u64;

/// Frames sent to a ledger node (by a client, or by the orderer delivering to peers).
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum NodeRequest {
    Propose {
        id: RequestId,
        proposal: SignedProposal,
    },
    Broadcast {
        id: RequestId,
        envelope: Envelope,
    },
    RegisterTx {
        tx_id: TransactionId,
    },
    UnregisterTx {
        tx_id: TransactionId,
    },
    Deliver {
        envelope: Envelope,
    },
}

#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum NodeResponse {
    ProposalResponse {
        id: RequestId,
        endorsement: Endorsement,
    },
    BroadcastResponse {
        id: RequestId,
        status: OrderingStatus,
        info: String,
    },
    TxEvent {
        tx_id: TransactionId,
        code: ValidationCode,
    },
    Failure {
        id: RequestId,
        message: String,
    },
}

impl NodeResponse {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            NodeResponse::ProposalResponse { id, .. }
            | NodeResponse::BroadcastResponse { id, .. }
            | NodeResponse::Failure { id, .. } => Some(*id),
            NodeResponse::TxEvent { .. } => None,
        }
    }
}
