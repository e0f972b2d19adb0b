use crate::session::{EventHub, TxEventReceiver};
use crate::transaction::{CommitFailure, CommitOutcome};

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use gate_common::{NodeId, TransactionId};
use log::{debug, error, info, warn};
use tokio::time::{timeout_at, Instant};

pub struct CommitNotificationAggregator {
    hubs: Vec<Arc<dyn EventHub>>,
    timeout: Duration,
}

impl CommitNotificationAggregator {
    pub fn new(hubs: Vec<Arc<dyn EventHub>>, timeout: Duration) -> Self {
        Self { hubs, timeout }
    }

    /// Connects and registers on all hubs concurrently.
    pub async fn subscribe(&self, tx_id: &TransactionId) -> Subscriptions {
        if self.hubs.is_empty() {
            warn!("transaction {}: no event hubs to confirm the commit with", tx_id);
        }
        let pending = join_all(
            self.hubs
                .iter()
                .map(|hub| subscribe_one(hub.clone(), tx_id, self.timeout)),
        )
        .await;
        Subscriptions {
            tx_id: tx_id.clone(),
            timeout: self.timeout,
            pending,
        }
    }
}

struct SubscriptionGuard {
    hub: Arc<dyn EventHub>,
    tx_id: TransactionId,
    registered: bool,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.registered {
            self.hub.unregister_tx_event(&self.tx_id);
        }
        self.hub.disconnect();
    }
}

enum Pending {
    Waiting {
        guard: SubscriptionGuard,
        receiver: TxEventReceiver,
        deadline: Instant,
    },
    Done(CommitOutcome),
}

async fn subscribe_one(hub: Arc<dyn EventHub>, tx_id: &TransactionId, limit: Duration) -> Pending {
    // The deadline runs from subscription, not from the first poll of wait_all.
    let deadline = Instant::now() + limit;
    let node = hub.node().clone();
    if !hub.is_connected() {
        debug!("transaction {}: connecting event hub {}", tx_id, node);
    }
    match timeout_at(deadline, hub.connect()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("transaction {}: event hub {} unreachable: {}", tx_id, node, e);
            return Pending::Done(CommitOutcome::failed(
                node,
                CommitFailure::Unreachable(e.to_string()),
            ));
        }
        Err(_) => return Pending::Done(request_timeout(tx_id, node, limit)),
    }

    let mut guard = SubscriptionGuard {
        hub: hub.clone(),
        tx_id: tx_id.clone(),
        registered: false,
    };
    match timeout_at(deadline, hub.register_tx_event(tx_id)).await {
        Ok(Ok(receiver)) => {
            guard.registered = true;
            Pending::Waiting {
                guard,
                receiver,
                deadline,
            }
        }
        Ok(Err(e)) => {
            error!("transaction {}: register on {} failed: {}", tx_id, node, e);
            Pending::Done(CommitOutcome::failed(
                node,
                CommitFailure::Unreachable(e.to_string()),
            ))
        }
        Err(_) => Pending::Done(request_timeout(tx_id, node, limit)),
    }
}

fn request_timeout(tx_id: &TransactionId, node: NodeId, limit: Duration) -> CommitOutcome {
    error!(
        "transaction {}: REQUEST_TIMEOUT waiting for commit event from {}",
        tx_id, node
    );
    CommitOutcome::failed(node, CommitFailure::Timeout(limit))
}

/// Live registrations for one transaction, one per hub.
pub struct Subscriptions {
    tx_id: TransactionId,
    timeout: Duration,
    pending: Vec<Pending>,
}

impl Subscriptions {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub async fn wait_all(self) -> Vec<CommitOutcome> {
        let Self {
            tx_id,
            timeout,
            pending,
        } = self;
        let tx_id = &tx_id;
        join_all(pending.into_iter().map(|pending| async move {
            match pending {
                Pending::Done(outcome) => outcome,
                Pending::Waiting {
                    guard,
                    receiver,
                    deadline,
                } => {
                    let node = guard.hub.node().clone();
                    let outcome = match timeout_at(deadline, receiver).await {
                        Ok(Ok(Ok(code))) => {
                            if code.is_valid() {
                                info!("transaction {}: committed as {} at {}", tx_id, code, node);
                            } else {
                                error!("transaction {}: committed as {} at {}", tx_id, code, node);
                            }
                            CommitOutcome::committed(node, code)
                        }
                        Ok(Ok(Err(reason))) => {
                            error!("transaction {}: event hub {} gave up: {}", tx_id, node, reason);
                            CommitOutcome::failed(node, CommitFailure::Unreachable(reason))
                        }
                        Ok(Err(_)) => {
                            error!("transaction {}: event hub {} dropped the registration", tx_id, node);
                            CommitOutcome::failed(
                                node,
                                CommitFailure::Unreachable("registration dropped".to_string()),
                            )
                        }
                        Err(_) => request_timeout(tx_id, node, timeout),
                    };
                    drop(guard);
                    outcome
                }
            }
        }))
        .await
    }
}
