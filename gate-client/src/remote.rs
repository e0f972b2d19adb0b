use crate::error::TransportError;
use crate::session::{Endorser, EventHub, Orderer, TxEventReceiver};
use crate::transaction::OrderingAck;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use bytes::Bytes;
use gate_common::{
    Endorsement, Envelope, NodeId, NodeRequest, NodeResponse, RequestId, SignedProposal,
    TransactionId, ValidationCode,
};
use gate_network::Connection;
use log::{debug, trace, warn};
use tokio::sync::{mpsc, oneshot};

type Listener = oneshot::Sender<Result<ValidationCode, String>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Waiters {
    calls: HashMap<RequestId, oneshot::Sender<NodeResponse>>,
    listeners: HashMap<TransactionId, Listener>,
    closed: bool,
}

/// One dialed socket. Nothing sent on it outlives it: when the socket goes,
/// queued frames are dropped and every waiter is failed.
struct Link {
    outbound: mpsc::Sender<Bytes>,
    waiters: Arc<Mutex<Waiters>>,
}

impl Link {
    fn is_open(&self) -> bool {
        !self.outbound.is_closed() && !lock(&self.waiters).closed
    }

    async fn send(&self, request: &NodeRequest) -> Result<(), TransportError> {
        let frame = Bytes::from(request.try_to_vec()?);
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn try_send(&self, request: &NodeRequest) {
        match request.try_to_vec() {
            Ok(frame) => {
                if let Err(e) = self.outbound.try_send(Bytes::from(frame)) {
                    warn!("dropped {:?}: {}", request, e);
                }
            }
            Err(e) => warn!("encode {:?}: {}", request, e),
        }
    }
}

/// Request/response access to one node, dialing a fresh [`Link`] whenever
/// the previous one is gone.
struct RpcLink {
    addr: SocketAddr,
    next_id: AtomicU64,
    current: Mutex<Option<Arc<Link>>>,
    dial: tokio::sync::Mutex<()>,
}

struct PendingGuard {
    waiters: Arc<Mutex<Waiters>>,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.waiters).calls.remove(&self.id);
    }
}

/// Removes a commit listener unless the registration went out.
struct Registration {
    waiters: Arc<Mutex<Waiters>>,
    tx_id: TransactionId,
    sent: bool,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.sent {
            lock(&self.waiters).listeners.remove(&self.tx_id);
        }
    }
}

impl RpcLink {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            next_id: AtomicU64::new(0),
            current: Default::default(),
            dial: Default::default(),
        }
    }

    fn current(&self) -> Option<Arc<Link>> {
        lock(&self.current)
            .as_ref()
            .filter(|link| link.is_open())
            .cloned()
    }

    async fn link(&self) -> Result<Arc<Link>, TransportError> {
        if let Some(link) = self.current() {
            return Ok(link);
        }
        let _dialing = self.dial.lock().await;
        if let Some(link) = self.current() {
            return Ok(link);
        }
        let (outbound, receiver) =
            Connection::connect(self.addr)
                .await
                .map_err(|source| TransportError::Connect {
                    addr: self.addr,
                    source,
                })?;
        debug!("connected to {}", self.addr);
        let link = Arc::new(Link {
            outbound,
            waiters: Default::default(),
        });
        tokio::spawn(dispatch(self.addr, receiver, link.waiters.clone()));
        *lock(&self.current) = Some(link.clone());
        Ok(link)
    }

    fn is_open(&self) -> bool {
        self.current().is_some()
    }

    fn close(&self) {
        if lock(&self.current).take().is_some() {
            debug!("closing link to {}", self.addr);
        }
    }

    async fn call(
        &self,
        request: impl FnOnce(RequestId) -> NodeRequest,
    ) -> Result<NodeResponse, TransportError> {
        let link = self.link().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = Bytes::from(request(id).try_to_vec()?);

        let (reply_sender, reply) = oneshot::channel();
        {
            let mut waiters = lock(&link.waiters);
            if waiters.closed {
                return Err(TransportError::Closed);
            }
            waiters.calls.insert(id, reply_sender);
        }
        let _guard = PendingGuard {
            waiters: link.waiters.clone(),
            id,
        };
        link.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)?;
        reply.await.map_err(|_| TransportError::Closed)
    }
}

async fn dispatch(
    addr: SocketAddr,
    mut receiver: mpsc::Receiver<(SocketAddr, Bytes)>,
    waiters: Arc<Mutex<Waiters>>,
) {
    while let Some((_, frame)) = receiver.recv().await {
        let response = match NodeResponse::try_from_slice(&frame) {
            Ok(response) => response,
            Err(e) => {
                warn!("{}: undecodable frame: {}", addr, e);
                continue;
            }
        };
        match response {
            NodeResponse::TxEvent { tx_id, code } => {
                match lock(&waiters).listeners.remove(&tx_id) {
                    Some(listener) => {
                        let _ = listener.send(Ok(code));
                    }
                    None => trace!("{}: nobody waits for {}", addr, tx_id),
                }
            }
            response => {
                let Some(id) = response.request_id() else {
                    continue;
                };
                match lock(&waiters).calls.remove(&id) {
                    Some(caller) => {
                        let _ = caller.send(response);
                    }
                    None => trace!("{}: late reply to request {}", addr, id),
                }
            }
        }
    }

    let mut waiters = lock(&waiters);
    waiters.closed = true;
    if !waiters.calls.is_empty() {
        warn!("{}: link lost with {} calls in flight", addr, waiters.calls.len());
    }
    waiters.calls.clear();
    for (tx_id, listener) in waiters.listeners.drain() {
        debug!("{}: link lost while waiting for {}", addr, tx_id);
        let _ = listener.send(Err(format!("connection to {addr} lost")));
    }
    trace!("{}: link closed", addr);
}

fn unexpected(response: &NodeResponse) -> TransportError {
    match response {
        NodeResponse::Failure { message, .. } => TransportError::Remote(message.clone()),
        other => TransportError::UnexpectedResponse(format!("{other:?}")),
    }
}

pub struct RemoteEndorser {
    node: NodeId,
    link: RpcLink,
}

impl RemoteEndorser {
    pub fn new(node: NodeId, addr: SocketAddr) -> Self {
        Self {
            node,
            link: RpcLink::new(addr),
        }
    }
}

#[async_trait]
impl Endorser for RemoteEndorser {
    fn node(&self) -> &NodeId {
        &self.node
    }

    async fn propose(&self, proposal: &SignedProposal) -> Result<Endorsement, TransportError> {
        let response = self
            .link
            .call(|id| NodeRequest::Propose {
                id,
                proposal: proposal.clone(),
            })
            .await?;
        match response {
            NodeResponse::ProposalResponse { endorsement, .. } => Ok(endorsement),
            other => Err(unexpected(&other)),
        }
    }
}

pub struct RemoteOrderer {
    node: NodeId,
    link: RpcLink,
}

impl RemoteOrderer {
    pub fn new(node: NodeId, addr: SocketAddr) -> Self {
        Self {
            node,
            link: RpcLink::new(addr),
        }
    }
}

#[async_trait]
impl Orderer for RemoteOrderer {
    fn node(&self) -> &NodeId {
        &self.node
    }

    async fn broadcast(&self, envelope: &Envelope) -> Result<OrderingAck, TransportError> {
        let response = self
            .link
            .call(|id| NodeRequest::Broadcast {
                id,
                envelope: envelope.clone(),
            })
            .await?;
        match response {
            NodeResponse::BroadcastResponse { status, info, .. } => Ok(OrderingAck { status, info }),
            other => Err(unexpected(&other)),
        }
    }
}

pub struct RemoteEventHub {
    node: NodeId,
    link: RpcLink,
    leases: Mutex<usize>,
}

impl RemoteEventHub {
    pub fn new(node: NodeId, addr: SocketAddr) -> Self {
        Self {
            node,
            link: RpcLink::new(addr),
            leases: Mutex::new(0),
        }
    }

    pub fn leases(&self) -> usize {
        *lock(&self.leases)
    }
}

#[async_trait]
impl EventHub for RemoteEventHub {
    fn node(&self) -> &NodeId {
        &self.node
    }

    fn is_connected(&self) -> bool {
        self.leases() > 0 && self.link.is_open()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.link.link().await?;
        *lock(&self.leases) += 1;
        Ok(())
    }

    fn disconnect(&self) {
        let mut leases = lock(&self.leases);
        match *leases {
            0 => warn!("event hub {}: disconnect without a lease", self.node),
            1 => {
                *leases = 0;
                self.link.close();
            }
            _ => *leases -= 1,
        }
    }

    async fn register_tx_event(
        &self,
        tx_id: &TransactionId,
    ) -> Result<TxEventReceiver, TransportError> {
        if self.leases() == 0 {
            return Err(TransportError::Closed);
        }
        let link = self.link.link().await?;
        let (sender, receiver) = oneshot::channel();
        {
            let mut waiters = lock(&link.waiters);
            if waiters.closed {
                return Err(TransportError::Closed);
            }
            waiters.listeners.insert(tx_id.clone(), sender);
        }
        let mut registration = Registration {
            waiters: link.waiters.clone(),
            tx_id: tx_id.clone(),
            sent: false,
        };
        link.send(&NodeRequest::RegisterTx {
            tx_id: tx_id.clone(),
        })
        .await?;
        registration.sent = true;
        trace!("event hub {}: registered {}", self.node, tx_id);
        Ok(receiver)
    }

    fn unregister_tx_event(&self, tx_id: &TransactionId) {
        let Some(link) = self.link.current() else {
            return;
        };
        let removed = lock(&link.waiters).listeners.remove(tx_id).is_some();
        if removed {
            link.try_send(&NodeRequest::UnregisterTx {
                tx_id: tx_id.clone(),
            });
        }
    }
}
