use crate::error::{NodeFailure, Phase, TransactionError};
use crate::transaction::{CombinedEndorsement, EndorsementResponse};

use gate_common::SignedProposal;
use log::{debug, error};

/// Unanimous endorsement check.
pub fn evaluate(
    proposal: SignedProposal,
    responses: Vec<EndorsementResponse>,
) -> Result<CombinedEndorsement, TransactionError> {
    let tx_id = &proposal.proposal.tx_id;
    let all_good = !responses.is_empty() && responses.iter().all(EndorsementResponse::is_ok);
    if all_good {
        for response in &responses {
            debug!(
                "transaction {}: endorsed by {} with status {}, message {:?}, {} payload bytes",
                tx_id,
                response.node,
                response.status,
                response.message,
                response.payload.len()
            );
        }
        return Ok(CombinedEndorsement::new(proposal, responses));
    }

    let dissenters: Vec<NodeFailure> = if responses.is_empty() {
        Vec::new()
    } else {
        responses
            .iter()
            .filter_map(EndorsementResponse::dissent)
            .collect()
    };
    error!(
        "transaction {}: rejected, {} of {} endorsers disagreed",
        tx_id,
        dissenters.len(),
        responses.len()
    );
    Err(TransactionError::EndorsementDisagreement {
        tx_id: tx_id.clone(),
        phase: Phase::Evaluating,
        dissenters,
    })
}
