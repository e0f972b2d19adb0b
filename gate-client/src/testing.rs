//! In-process stand-ins for peers, orderer and event hubs.

use crate::error::TransportError;
use crate::session::{
    ChannelHandle, Endorser, EventHub, Identity, Invocation, Orderer, SessionContext,
    TxEventReceiver,
};
use crate::transaction::{EndorsementResponse, OrderingAck};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gate_common::crypto::generate_keypair;
use gate_common::{
    new_nonce, Endorsement, Envelope, NodeId, OrderingStatus, Proposal, ProposalKind,
    SignedProposal, TransactionId, ValidationCode, OK_STATUS,
};
use tokio::sync::oneshot;

pub const CHANNEL: &str = "mychannel";

pub fn identity(name: &str) -> Identity {
    Identity::new(name, "Org1MSP", generate_keypair())
}

pub fn invocation() -> Invocation {
    Invocation::new(CHANNEL, "mycc", "move", vec!["a".into(), "b".into(), "10".into()])
}

pub fn signed_proposal() -> SignedProposal {
    let alice = identity("alice");
    let nonce = new_nonce();
    let proposal = Proposal {
        tx_id: TransactionId::derive(&nonce, &alice.public_key()),
        channel: CHANNEL.to_string(),
        chaincode_id: "mycc".to_string(),
        function: "move".to_string(),
        args: vec!["a".into(), "b".into(), "10".into()],
        kind: ProposalKind::Invoke,
        creator: alice.public_key(),
        nonce,
        timestamp_ms: 0,
    };
    let signature = alice.sign(&proposal.signing_bytes().unwrap());
    SignedProposal {
        proposal,
        signature,
    }
}

pub fn good_response(node: &str) -> EndorsementResponse {
    EndorsementResponse {
        node: node.into(),
        status: OK_STATUS,
        message: String::new(),
        payload: b"result".to_vec(),
        signature: vec![1; 64],
        error: None,
    }
}

pub fn session(
    endorsers: &[Arc<MockEndorser>],
    orderer: Arc<MockOrderer>,
    hubs: &[Arc<MockEventHub>],
) -> SessionContext {
    let endorsers = endorsers
        .iter()
        .map(|e| e.clone() as Arc<dyn Endorser>)
        .collect();
    let channel = ChannelHandle::new(CHANNEL, endorsers, orderer);
    let hubs = hubs.iter().map(|h| h.clone() as Arc<dyn EventHub>).collect();
    SessionContext::new("Org1", vec![identity("alice")], vec![channel], hubs)
}

enum EndorserBehavior {
    Respond { status: u32, delay: Duration },
    Unreachable,
    Hang,
    Error(String),
}

pub struct MockEndorser {
    node: NodeId,
    behavior: EndorserBehavior,
    calls: AtomicUsize,
}

impl MockEndorser {
    fn new(name: &str, behavior: EndorserBehavior) -> Arc<Self> {
        Arc::new(Self {
            node: name.into(),
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn ok(name: &str) -> Arc<Self> {
        Self::with_status(name, OK_STATUS)
    }

    pub fn with_status(name: &str, status: u32) -> Arc<Self> {
        Self::delayed(name, Duration::ZERO, status)
    }

    pub fn delayed(name: &str, delay: Duration, status: u32) -> Arc<Self> {
        Self::new(name, EndorserBehavior::Respond { status, delay })
    }

    pub fn unreachable(name: &str) -> Arc<Self> {
        Self::new(name, EndorserBehavior::Unreachable)
    }

    pub fn hanging(name: &str) -> Arc<Self> {
        Self::new(name, EndorserBehavior::Hang)
    }

    pub fn erroring(name: &str, message: &str) -> Arc<Self> {
        Self::new(name, EndorserBehavior::Error(message.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Endorser for MockEndorser {
    fn node(&self) -> &NodeId {
        &self.node
    }

    async fn propose(&self, proposal: &SignedProposal) -> Result<Endorsement, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            EndorserBehavior::Respond { status, delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                let payload = if *status == OK_STATUS {
                    b"result".to_vec()
                } else {
                    Vec::new()
                };
                let message = if *status == OK_STATUS {
                    String::new()
                } else {
                    format!("{} failed", proposal.proposal.function)
                };
                Ok(Endorsement {
                    endorser: self.node.clone(),
                    status: *status,
                    message,
                    payload,
                    signature: vec![7; 64],
                })
            }
            EndorserBehavior::Unreachable => Err(TransportError::Closed),
            EndorserBehavior::Hang => futures::future::pending().await,
            EndorserBehavior::Error(message) => Err(TransportError::Remote(message.clone())),
        }
    }
}

enum OrdererBehavior {
    Answer(OrderingStatus),
    Hang,
}

pub struct MockOrderer {
    node: NodeId,
    behavior: OrdererBehavior,
    hubs: Vec<Arc<MockEventHub>>,
    received: Mutex<Vec<Envelope>>,
    listening: Mutex<Vec<Vec<usize>>>,
}

impl MockOrderer {
    fn new(behavior: OrdererBehavior, hubs: Vec<Arc<MockEventHub>>) -> Arc<Self> {
        Arc::new(Self {
            node: "orderer0".into(),
            behavior,
            hubs,
            received: Default::default(),
            listening: Default::default(),
        })
    }

    pub fn accepting(hubs: Vec<Arc<MockEventHub>>) -> Arc<Self> {
        Self::new(OrdererBehavior::Answer(OrderingStatus::Success), hubs)
    }

    pub fn rejecting(status: OrderingStatus) -> Arc<Self> {
        Self::new(OrdererBehavior::Answer(status), Vec::new())
    }

    pub fn hanging() -> Arc<Self> {
        Self::new(OrdererBehavior::Hang, Vec::new())
    }

    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    /// Per broadcast, how many registrations each delivery hub held when it arrived.
    pub fn listeners_at_broadcast(&self) -> Vec<Vec<usize>> {
        self.listening.lock().unwrap().clone()
    }
}

#[async_trait]
impl Orderer for MockOrderer {
    fn node(&self) -> &NodeId {
        &self.node
    }

    async fn broadcast(&self, envelope: &Envelope) -> Result<OrderingAck, TransportError> {
        self.received.lock().unwrap().push(envelope.clone());
        self.listening
            .lock()
            .unwrap()
            .push(self.hubs.iter().map(|hub| hub.listeners()).collect());
        match &self.behavior {
            OrdererBehavior::Answer(status) => {
                if status.is_success() {
                    for hub in &self.hubs {
                        hub.deliver(envelope.tx_id());
                    }
                }
                Ok(OrderingAck {
                    status: *status,
                    info: String::new(),
                })
            }
            OrdererBehavior::Hang => futures::future::pending().await,
        }
    }
}

#[derive(Clone, Debug)]
pub enum HubBehavior {
    Fire(ValidationCode),
    Never,
    RefuseConnect,
}

type Listener = oneshot::Sender<Result<ValidationCode, String>>;

pub struct MockEventHub {
    node: NodeId,
    behavior: HubBehavior,
    leases: AtomicUsize,
    listeners: Mutex<HashMap<TransactionId, Listener>>,
    committed: Mutex<HashMap<TransactionId, ValidationCode>>,
}

impl MockEventHub {
    pub fn new(name: &str, behavior: HubBehavior) -> Arc<Self> {
        Arc::new(Self {
            node: name.into(),
            behavior,
            leases: AtomicUsize::new(0),
            listeners: Default::default(),
            committed: Default::default(),
        })
    }

    pub fn leases(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }

    pub fn listeners(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn deliver(&self, tx_id: &TransactionId) {
        let HubBehavior::Fire(code) = &self.behavior else {
            return;
        };
        self.committed
            .lock()
            .unwrap()
            .insert(tx_id.clone(), code.clone());
        if let Some(listener) = self.listeners.lock().unwrap().remove(tx_id) {
            let _ = listener.send(Ok(code.clone()));
        }
    }
}

#[async_trait]
impl EventHub for MockEventHub {
    fn node(&self) -> &NodeId {
        &self.node
    }

    fn is_connected(&self) -> bool {
        self.leases() > 0
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if let HubBehavior::RefuseConnect = self.behavior {
            return Err(TransportError::Closed);
        }
        self.leases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        let previous = self.leases.fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "{} released more leases than it gave", self.node);
    }

    async fn register_tx_event(
        &self,
        tx_id: &TransactionId,
    ) -> Result<TxEventReceiver, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let (sender, receiver) = oneshot::channel();
        match self.committed.lock().unwrap().get(tx_id) {
            Some(code) => {
                let _ = sender.send(Ok(code.clone()));
            }
            None => {
                self.listeners.lock().unwrap().insert(tx_id.clone(), sender);
            }
        }
        Ok(receiver)
    }

    fn unregister_tx_event(&self, tx_id: &TransactionId) {
        self.listeners.lock().unwrap().remove(tx_id);
    }
}
