use gate_common::crypto;
use gate_common::{
    Endorsement, Envelope, NodeId, NodeResponse, ProposalKind, SignedProposal, TransactionId,
    ValidationCode, OK_STATUS,
};

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use ed25519_dalek::Keypair;
use log::{debug, info, warn};
use tokio::time::Instant;

pub const REJECTED_STATUS: u32 = 500;
pub const FORBIDDEN_STATUS: u32 = 403;
/// Registrations from clients that vanished without unregistering are
/// dropped after this long.
pub const LISTENER_TTL: Duration = Duration::from_secs(600);

/// Endorsing peer with a commit event hub.
///
/// Chaincode is simulated: every accepted proposal yields a payload echoing
/// the call, and functions listed in `reject_functions` fail with status 500.
pub struct Peer {
    name: NodeId,
    keypair: Keypair,
    reject_functions: HashSet<String>,
    committed: HashMap<TransactionId, ValidationCode>,
    listeners: HashMap<TransactionId, HashMap<SocketAddr, Instant>>,
}

impl Peer {
    pub fn new(name: NodeId, keypair: Keypair, reject_functions: Vec<String>) -> Self {
        Self {
            name,
            keypair,
            reject_functions: reject_functions.into_iter().collect(),
            committed: Default::default(),
            listeners: Default::default(),
        }
    }

    pub fn name(&self) -> &NodeId {
        &self.name
    }

    pub fn endorse(&self, signed: &SignedProposal) -> Endorsement {
        let proposal = &signed.proposal;
        let (status, message, payload) = if !creator_signed(signed) {
            warn!("{}: bad creator signature on {}", self.name, proposal.tx_id);
            (FORBIDDEN_STATUS, "creator signature invalid".to_string(), Vec::new())
        } else if self.reject_functions.contains(&proposal.function) {
            (
                REJECTED_STATUS,
                format!("chaincode {} refused {}", proposal.chaincode_id, proposal.function),
                Vec::new(),
            )
        } else {
            let payload = match &proposal.kind {
                ProposalKind::Instantiate { version } | ProposalKind::Upgrade { version } => {
                    format!("{}:{}", proposal.chaincode_id, version)
                }
                ProposalKind::Invoke | ProposalKind::Query => {
                    format!("{}({})", proposal.function, proposal.args.join(","))
                }
            };
            (OK_STATUS, String::new(), payload.into_bytes())
        };
        debug!("{}: endorse {} with {}", self.name, proposal.tx_id, status);
        let signature = crypto::sign(
            &self.keypair,
            &Endorsement::signing_bytes(&proposal.tx_id, status, &payload),
        );
        Endorsement {
            endorser: self.name.clone(),
            status,
            message,
            payload,
            signature,
        }
    }

    pub fn commit(&mut self, envelope: &Envelope) -> (ValidationCode, Vec<(SocketAddr, NodeResponse)>) {
        let tx_id = envelope.tx_id();
        let code = self.validate(envelope);
        if self.committed.contains_key(tx_id) {
            // The first verdict on a transaction id is final.
            return (code, Vec::new());
        }
        info!("{}: committed {} as {}", self.name, tx_id, code);
        self.committed.insert(tx_id.clone(), code.clone());
        let events = self
            .listeners
            .remove(tx_id)
            .unwrap_or_default()
            .into_keys()
            .map(|addr| (addr, tx_event(tx_id, &code)))
            .collect();
        (code, events)
    }

    fn validate(&self, envelope: &Envelope) -> ValidationCode {
        if self.committed.contains_key(envelope.tx_id()) {
            return ValidationCode::DuplicateTxId;
        }
        let signed = Envelope::signing_bytes(&envelope.proposal, &envelope.endorsements)
            .map(|bytes| crypto::verify(&envelope.proposal.creator, &bytes, &envelope.signature));
        if !matches!(signed, Ok(Ok(()))) {
            return ValidationCode::BadPayload;
        }
        if envelope.endorsements.is_empty()
            || envelope.endorsements.iter().any(|e| e.status != OK_STATUS)
        {
            return ValidationCode::EndorsementPolicyFailure;
        }
        ValidationCode::Valid
    }

    /// Registers `addr` for the commit of `tx_id`; answers at once if the
    /// transaction is already committed.
    pub fn register(&mut self, addr: SocketAddr, tx_id: TransactionId) -> Option<NodeResponse> {
        if let Some(code) = self.committed.get(&tx_id) {
            debug!("{}: {} already committed, notify {} now", self.name, tx_id, addr);
            return Some(tx_event(&tx_id, code));
        }
        let now = Instant::now();
        self.prune(now);
        self.listeners.entry(tx_id).or_default().insert(addr, now);
        None
    }

    fn prune(&mut self, now: Instant) {
        let before = self.listeners.len();
        self.listeners.retain(|_, waiting| {
            waiting.retain(|_, since| now.duration_since(*since) < LISTENER_TTL);
            !waiting.is_empty()
        });
        if self.listeners.len() < before {
            debug!(
                "{}: dropped stale registrations for {} transactions",
                self.name,
                before - self.listeners.len()
            );
        }
    }

    pub fn unregister(&mut self, addr: SocketAddr, tx_id: &TransactionId) {
        if let Some(listeners) = self.listeners.get_mut(tx_id) {
            listeners.remove(&addr);
            if listeners.is_empty() {
                self.listeners.remove(tx_id);
            }
        }
    }
}

fn creator_signed(signed: &SignedProposal) -> bool {
    signed
        .proposal
        .signing_bytes()
        .map(|bytes| crypto::verify(&signed.proposal.creator, &bytes, &signed.signature).is_ok())
        .unwrap_or(false)
}

fn tx_event(tx_id: &TransactionId, code: &ValidationCode) -> NodeResponse {
    NodeResponse::TxEvent {
        tx_id: tx_id.clone(),
        code: code.clone(),
    }
}
