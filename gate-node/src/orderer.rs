use gate_common::crypto;
use gate_common::{Envelope, OrderingStatus, TransactionId};

use std::collections::HashSet;

use log::{info, warn};

/// Single-node sequencer: accepts each transaction id once, in arrival order.
#[derive(Default)]
pub struct Sequencer {
    ordered: HashSet<TransactionId>,
    height: u64,
}

impl Sequencer {
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn order(&mut self, envelope: &Envelope) -> (OrderingStatus, String) {
        let tx_id = envelope.tx_id();
        if envelope.endorsements.is_empty() {
            warn!("envelope {} carries no endorsements", tx_id);
            return (OrderingStatus::BadRequest, "no endorsements".to_string());
        }
        let signed = Envelope::signing_bytes(&envelope.proposal, &envelope.endorsements)
            .map(|bytes| crypto::verify(&envelope.proposal.creator, &bytes, &envelope.signature));
        if !matches!(signed, Ok(Ok(()))) {
            warn!("envelope {} is not signed by its creator", tx_id);
            return (OrderingStatus::Forbidden, "bad envelope signature".to_string());
        }
        if !self.ordered.insert(tx_id.clone()) {
            warn!("envelope {} was already ordered", tx_id);
            return (OrderingStatus::BadRequest, format!("duplicate transaction {tx_id}"));
        }
        self.height += 1;
        info!("ordered {} at height {}", tx_id, self.height);
        (OrderingStatus::Success, String::new())
    }
}

#[cfg(test)]
mod orderer_test {
    use super::*;

    use gate_common::crypto::generate_keypair;
    use gate_common::{new_nonce, Endorsement, Proposal, ProposalKind, OK_STATUS};

    use ed25519_dalek::Keypair;

    fn envelope(creator: &Keypair, signer: &Keypair, endorsements: usize) -> Envelope {
        let nonce = new_nonce();
        let proposal = Proposal {
            tx_id: TransactionId::derive(&nonce, &creator.public.to_bytes()),
            channel: "mychannel".to_string(),
            chaincode_id: "mycc".to_string(),
            function: "move".to_string(),
            args: Vec::new(),
            kind: ProposalKind::Invoke,
            creator: creator.public.to_bytes(),
            nonce,
            timestamp_ms: 0,
        };
        let endorsements: Vec<_> = (0..endorsements)
            .map(|n| Endorsement {
                endorser: format!("peer{n}").as_str().into(),
                status: OK_STATUS,
                message: String::new(),
                payload: Vec::new(),
                signature: Vec::new(),
            })
            .collect();
        let bytes = Envelope::signing_bytes(&proposal, &endorsements).unwrap();
        Envelope {
            signature: crypto::sign(signer, &bytes),
            proposal,
            endorsements,
        }
    }

    #[test]
    fn each_transaction_is_ordered_once() {
        let creator = generate_keypair();
        let mut sequencer = Sequencer::default();
        let envelope = envelope(&creator, &creator, 2);
        assert_eq!(sequencer.order(&envelope).0, OrderingStatus::Success);
        let (status, info) = sequencer.order(&envelope);
        assert_eq!(status, OrderingStatus::BadRequest);
        assert!(info.contains("duplicate"));
        assert_eq!(sequencer.height(), 1);
    }

    #[test]
    fn unendorsed_or_forged_envelopes_are_refused() {
        let creator = generate_keypair();
        let mut sequencer = Sequencer::default();
        assert_eq!(
            sequencer.order(&envelope(&creator, &creator, 0)).0,
            OrderingStatus::BadRequest
        );
        assert_eq!(
            sequencer.order(&envelope(&creator, &generate_keypair(), 1)).0,
            OrderingStatus::Forbidden
        );
        assert_eq!(sequencer.height(), 0);
    }
}
