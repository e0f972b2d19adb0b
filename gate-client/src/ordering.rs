use crate::error::{Phase, TransactionError, TransportError};
use crate::session::{Identity, Orderer};
use crate::transaction::{CombinedEndorsement, OrderingAck};

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gate_common::{Envelope, NodeId, TransactionId};
use log::{debug, error, info};
use tokio::time::timeout;

const RECENT_SUBMISSIONS: usize = 4096;

/// Bounded memory of transaction ids already handed to the orderer.
#[derive(Default)]
struct RecentIds {
    order: VecDeque<TransactionId>,
    ids: HashSet<TransactionId>,
}

impl RecentIds {
    fn insert(&mut self, tx_id: &TransactionId) -> bool {
        if !self.ids.insert(tx_id.clone()) {
            return false;
        }
        self.order.push_back(tx_id.clone());
        if self.order.len() > RECENT_SUBMISSIONS {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

pub struct OrderingSubmitter {
    orderer: Arc<dyn Orderer>,
    submitted: Mutex<RecentIds>,
}

impl OrderingSubmitter {
    pub fn new(orderer: Arc<dyn Orderer>) -> Self {
        Self {
            orderer,
            submitted: Default::default(),
        }
    }

    pub fn orderer(&self) -> &NodeId {
        self.orderer.node()
    }

    /// Wraps the endorsed proposal into an envelope signed by `identity` and
    /// broadcasts it once.
    pub async fn submit(
        &self,
        combined: CombinedEndorsement,
        identity: &Identity,
        limit: Duration,
    ) -> Result<OrderingAck, TransactionError> {
        let tx_id = combined.tx_id().clone();
        let proposal = combined.proposal().proposal.clone();
        let endorsements = combined.endorsements();
        let bytes = Envelope::signing_bytes(&proposal, &endorsements)
            .map_err(|e| rejected(&tx_id, None, format!("encode envelope: {e}")))?;
        let envelope = Envelope {
            signature: identity.sign(&bytes),
            proposal,
            endorsements,
        };

        if !self.recent().insert(&tx_id) {
            error!("transaction {}: refusing to submit twice", tx_id);
            return Err(TransactionError::DuplicateSubmission {
                tx_id,
                phase: Phase::Ordering,
            });
        }

        debug!(
            "transaction {}: sending to orderer {} with {} endorsements",
            tx_id,
            self.orderer.node(),
            envelope.endorsements.len()
        );
        let outcome = match timeout(limit, self.orderer.broadcast(&envelope)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Timeout(limit)),
        };
        match outcome {
            Ok(ack) if ack.is_accepted() => {
                info!("transaction {}: accepted by orderer {}", tx_id, self.orderer.node());
                Ok(ack)
            }
            Ok(ack) => {
                error!(
                    "transaction {}: orderer {} answered {}: {}",
                    tx_id,
                    self.orderer.node(),
                    ack.status,
                    ack.info
                );
                Err(rejected(&tx_id, Some(ack), String::new()))
            }
            Err(e) => {
                error!(
                    "transaction {}: broadcast to {} failed: {}",
                    tx_id,
                    self.orderer.node(),
                    e
                );
                Err(rejected(&tx_id, None, e.to_string()))
            }
        }
    }

    fn recent(&self) -> MutexGuard<'_, RecentIds> {
        self.submitted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn rejected(tx_id: &TransactionId, ack: Option<OrderingAck>, info: String) -> TransactionError {
    let (status, info) = match ack {
        Some(ack) => (Some(ack.status), ack.info),
        None => (None, info),
    };
    TransactionError::OrderingRejected {
        tx_id: tx_id.clone(),
        phase: Phase::Ordering,
        status,
        info,
    }
}
