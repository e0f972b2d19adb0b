use crate::crypto::PublicKeyBytes;

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const OK_STATUS: u32 = 200;

pub const NONCE_LEN: usize = 24;

/// Correlates one proposal, its ordering submission and every commit event.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct TransactionId(String);

impl TransactionId {
    /// `hex(sha256(nonce || creator))`
    pub fn derive(nonce: &[u8], creator: &PublicKeyBytes) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(nonce);
        hasher.update(creator);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn new_nonce() -> Vec<u8> {
    let mut nonce = vec![0; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ValidationCode {
    Valid,
    DuplicateTxId,
    EndorsementPolicyFailure,
    BadPayload,
    MvccReadConflict,
    Other(String),
}

impl ValidationCode {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationCode::Valid)
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationCode::Valid => f.write_str("VALID"),
            ValidationCode::DuplicateTxId => f.write_str("DUPLICATE_TXID"),
            ValidationCode::EndorsementPolicyFailure => f.write_str("ENDORSEMENT_POLICY_FAILURE"),
            ValidationCode::BadPayload => f.write_str("BAD_PAYLOAD"),
            ValidationCode::MvccReadConflict => f.write_str("MVCC_READ_CONFLICT"),
            ValidationCode::Other(code) => f.write_str(code),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum OrderingStatus {
    Success,
    BadRequest,
    Forbidden,
    ServiceUnavailable,
    InternalServerError,
}

impl OrderingStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, OrderingStatus::Success)
    }
}

impl fmt::Display for OrderingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderingStatus::Success => "SUCCESS",
            OrderingStatus::BadRequest => "BAD_REQUEST",
            OrderingStatus::Forbidden => "FORBIDDEN",
            OrderingStatus::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            OrderingStatus::InternalServerError => "INTERNAL_SERVER_ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ProposalKind {
    Invoke,
    Query,
    Instantiate { version: String },
    Upgrade { version: String },
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub tx_id: TransactionId,
    pub channel: String,
    pub chaincode_id: String,
    pub function: String,
    pub args: Vec<String>,
    pub kind: ProposalKind,
    pub creator: PublicKeyBytes,
    pub nonce: Vec<u8>,
    pub timestamp_ms: i64,
}

impl Proposal {
    pub fn signing_bytes(&self) -> std::io::Result<Vec<u8>> {
        self.try_to_vec()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedProposal {
    pub proposal: Proposal,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Endorsement {
    pub endorser: NodeId,
    pub status: u32,
    pub message: String,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Endorsement {
    pub fn signing_bytes(tx_id: &TransactionId, status: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(tx_id.as_str().len() + 4 + payload.len());
        bytes.extend_from_slice(tx_id.as_str().as_bytes());
        bytes.extend_from_slice(&status.to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Envelope {
    pub proposal: Proposal,
    pub endorsements: Vec<Endorsement>,
    pub signature: Vec<u8>,
}

impl Envelope {
    pub fn tx_id(&self) -> &TransactionId {
        &self.proposal.tx_id
    }

    pub fn signing_bytes(
        proposal: &Proposal,
        endorsements: &[Endorsement],
    ) -> std::io::Result<Vec<u8>> {
        let mut bytes = proposal.try_to_vec()?;
        for endorsement in endorsements {
            endorsement.serialize(&mut bytes)?;
        }
        Ok(bytes)
    }
}
