use crate::error::{NodeFailure, Phase, TransactionError, TransportError};
use crate::session::Endorser;
use crate::transaction::EndorsementResponse;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use gate_common::{SignedProposal, TransactionId};
use log::{error, info, warn};
use tokio::time::{timeout_at, Instant};

pub struct ProposalRequest {
    pub proposal: SignedProposal,
    pub targets: Vec<Arc<dyn Endorser>>,
    pub timeout: Duration,
}

impl ProposalRequest {
    pub fn tx_id(&self) -> &TransactionId {
        &self.proposal.proposal.tx_id
    }
}

/// Sends the proposal to every target at once and collects one response per
/// target, in target order.
pub async fn broadcast(
    request: &ProposalRequest,
) -> Result<Vec<EndorsementResponse>, TransactionError> {
    let tx_id = request.tx_id();
    if request.targets.is_empty() {
        error!("transaction {}: no endorsing peers to send the proposal to", tx_id);
        return Err(TransactionError::ProposalTransport {
            tx_id: tx_id.clone(),
            phase: Phase::Proposing,
            failures: Vec::new(),
        });
    }

    let deadline = Instant::now() + request.timeout;
    let calls = request.targets.iter().map(|endorser| async move {
        let node = endorser.node().clone();
        let outcome = match timeout_at(deadline, endorser.propose(&request.proposal)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(request.timeout)),
        };
        match outcome {
            Ok(endorsement) => {
                if endorsement.endorser != node {
                    warn!(
                        "transaction {}: {} answered as {}",
                        tx_id, node, endorsement.endorser
                    );
                }
                let mut response = EndorsementResponse::from(endorsement);
                response.node = node;
                if response.is_ok() {
                    info!("transaction {}: proposal was GOOD at {}", tx_id, response.node);
                } else {
                    error!(
                        "transaction {}: proposal was BAD at {}: status {} {}",
                        tx_id, response.node, response.status, response.message
                    );
                }
                (response, true)
            }
            Err(e) => {
                error!("transaction {}: proposal to {} failed: {}", tx_id, node, e);
                let reachable = !e.is_unreachable();
                (EndorsementResponse::failed(node, e.to_string()), reachable)
            }
        }
    });
    let results = join_all(calls).await;

    if results.iter().all(|(_, reachable)| !reachable) {
        let failures = results
            .into_iter()
            .map(|(response, _)| {
                let reason = response.error.unwrap_or_default();
                NodeFailure::new(response.node, reason)
            })
            .collect();
        return Err(TransactionError::ProposalTransport {
            tx_id: tx_id.clone(),
            phase: Phase::Proposing,
            failures,
        });
    }
    Ok(results.into_iter().map(|(response, _)| response).collect())
}
