use crate::agreement;
use crate::config::Timeouts;
use crate::error::{Phase, TransactionError};
use crate::notification::CommitNotificationAggregator;
use crate::proposal::ProposalRequest;
use crate::session::{Identity, Invocation, SessionContext};
use crate::transaction::{CombinedEndorsement, QueryResult, TransactionResult};

use std::fmt;

use gate_common::{ProposalKind, TransactionId};
use log::{debug, info};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxState {
    Proposing,
    Evaluating,
    Rejected,
    SubmittingAndConfirming,
    Committed,
    OrderingFailed,
    ConfirmationFailed,
    Cancelled,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Progress<'a> {
    tx_id: &'a TransactionId,
    state: TxState,
}

impl<'a> Progress<'a> {
    fn start(tx_id: &'a TransactionId) -> Self {
        debug!("transaction {}: {}", tx_id, TxState::Proposing);
        Self {
            tx_id,
            state: TxState::Proposing,
        }
    }

    fn advance(&mut self, next: TxState) {
        debug!("transaction {}: {} -> {}", self.tx_id, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, error: TransactionError) -> TransactionError {
        let next = match &error {
            TransactionError::EndorsementDisagreement { .. } => TxState::Rejected,
            TransactionError::OrderingRejected { .. }
            | TransactionError::DuplicateSubmission { .. } => TxState::OrderingFailed,
            TransactionError::ConfirmationTimeout { .. }
            | TransactionError::ConfirmationInvalid { .. } => TxState::ConfirmationFailed,
            TransactionError::Cancelled { .. } => TxState::Cancelled,
            _ => self.state,
        };
        if next != self.state {
            self.advance(next);
        }
        error
    }

    fn cancelled(&mut self, phase: Phase) -> TransactionError {
        self.fail(TransactionError::Cancelled {
            tx_id: self.tx_id.clone(),
            phase,
        })
    }
}

/// Drives one transaction from proposal to confirmed commit.
#[derive(Clone, Debug, Default)]
pub struct TransactionCoordinator {
    timeouts: Timeouts,
}

impl TransactionCoordinator {
    pub fn new(timeouts: Timeouts) -> Self {
        Self { timeouts }
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Runs the full protocol under a fresh transaction id.
    pub async fn execute(
        &self,
        session: &SessionContext,
        identity: &Identity,
        invocation: &Invocation,
        kind: ProposalKind,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult, TransactionError> {
        let proposal = session.new_proposal(identity, invocation, kind)?;
        let tx_id = proposal.proposal.tx_id.clone();
        let mut progress = Progress::start(&tx_id);

        let combined = self
            .endorse(session, proposal, &mut progress, cancel)
            .await?;
        let payload = combined.payload().to_vec();

        progress.advance(TxState::SubmittingAndConfirming);
        let aggregator =
            CommitNotificationAggregator::new(session.event_hubs().to_vec(), self.timeouts.event);
        let subscriptions = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(progress.cancelled(Phase::Confirming)),
            subscriptions = aggregator.subscribe(&tx_id) => subscriptions,
        };

        let ordering = session.submit_ordered(combined, identity, self.timeouts.ordering);
        let confirmations = subscriptions.wait_all();
        tokio::pin!(ordering);
        tokio::pin!(confirmations);

        let mut outcomes = None;
        let ack = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(progress.cancelled(Phase::Ordering)),
                ack = &mut ordering => break ack,
                done = &mut confirmations, if outcomes.is_none() => outcomes = Some(done),
            }
        };
        let ack = ack.map_err(|e| progress.fail(e))?;

        let outcomes = match outcomes {
            Some(outcomes) => outcomes,
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(progress.cancelled(Phase::Confirming)),
                outcomes = &mut confirmations => outcomes,
            },
        };

        let result = TransactionResult::new(tx_id.clone(), ack, outcomes, payload)
            .into_checked()
            .map_err(|e| progress.fail(e))?;
        progress.advance(TxState::Committed);
        info!("transaction {}: committed on every peer", tx_id);
        Ok(result)
    }

    pub async fn query(
        &self,
        session: &SessionContext,
        identity: &Identity,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, TransactionError> {
        let proposal = session.new_proposal(identity, invocation, ProposalKind::Query)?;
        let tx_id = proposal.proposal.tx_id.clone();
        let mut progress = Progress::start(&tx_id);
        let combined = self
            .endorse(session, proposal, &mut progress, cancel)
            .await?;
        Ok(QueryResult {
            payload: combined.payload().to_vec(),
            tx_id,
        })
    }

    async fn endorse(
        &self,
        session: &SessionContext,
        proposal: gate_common::SignedProposal,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<CombinedEndorsement, TransactionError> {
        let request = session.proposal_request(proposal, self.timeouts.proposal)?;
        let responses = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(progress.cancelled(Phase::Proposing)),
            responses = session.propose_operation(&request) => responses?,
        };

        progress.advance(TxState::Evaluating);
        let ProposalRequest { proposal, .. } = request;
        agreement::evaluate(proposal, responses).map_err(|e| progress.fail(e))
    }
}

#[cfg(test)]
mod coordinator_test {
    use super::*;
    use crate::testing::{
        identity, invocation, session, HubBehavior, MockEndorser, MockEventHub, MockOrderer,
    };

    use std::sync::Arc;
    use std::time::Duration;

    use gate_common::{NodeId, OrderingStatus, ValidationCode};
    use tokio::time::Instant;

    fn coordinator() -> TransactionCoordinator {
        TransactionCoordinator::new(Timeouts {
            proposal: Duration::from_secs(120),
            event: Duration::from_secs(30),
            ordering: Duration::from_secs(30),
        })
    }

    fn valid_hubs() -> Vec<Arc<MockEventHub>> {
        vec![
            MockEventHub::new("peer0", HubBehavior::Fire(ValidationCode::Valid)),
            MockEventHub::new("peer1", HubBehavior::Fire(ValidationCode::Valid)),
        ]
    }

    fn released(hubs: &[Arc<MockEventHub>]) -> bool {
        hubs.iter().all(|hub| hub.leases() == 0 && hub.listeners() == 0)
    }

    #[tokio::test]
    async fn endorsed_ordered_and_committed_everywhere() {
        let hubs = valid_hubs();
        let orderer = MockOrderer::accepting(hubs.clone());
        let endorsers = [MockEndorser::ok("peer0"), MockEndorser::ok("peer1")];
        let session = session(&endorsers, orderer.clone(), &hubs);

        let result = coordinator()
            .execute(
                &session,
                &identity("alice"),
                &invocation(),
                ProposalKind::Invoke,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.payload(), b"result");
        assert_eq!(result.outcomes().len(), 2);
        assert!(result.outcomes().iter().all(|o| o.is_valid()));
        assert_eq!(orderer.calls(), 1);
        assert_eq!(orderer.received()[0].tx_id(), result.tx_id());
        assert!(released(&hubs));
    }

    #[tokio::test]
    async fn hubs_listen_before_the_envelope_reaches_the_orderer() {
        let hubs = valid_hubs();
        let orderer = MockOrderer::accepting(hubs.clone());
        let endorsers = [MockEndorser::ok("peer0"), MockEndorser::ok("peer1")];
        let session = session(&endorsers, orderer.clone(), &hubs);

        coordinator()
            .execute(
                &session,
                &identity("alice"),
                &invocation(),
                ProposalKind::Invoke,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(orderer.listeners_at_broadcast(), vec![vec![1, 1]]);
    }

    #[tokio::test]
    async fn one_bad_endorsement_stops_before_ordering() {
        let hubs = valid_hubs();
        let orderer = MockOrderer::accepting(hubs.clone());
        let endorsers = [MockEndorser::ok("peer0"), MockEndorser::with_status("peer1", 500)];
        let session = session(&endorsers, orderer.clone(), &hubs);

        let err = coordinator()
            .execute(
                &session,
                &identity("alice"),
                &invocation(),
                ProposalKind::Invoke,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match &err {
            TransactionError::EndorsementDisagreement { dissenters, phase, .. } => {
                assert_eq!(*phase, Phase::Evaluating);
                assert_eq!(dissenters.len(), 1);
                assert_eq!(dissenters[0].node, NodeId::from("peer1"));
                assert!(dissenters[0].reason.starts_with("status 500"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(orderer.calls(), 0);
        assert!(released(&hubs));
    }

    #[tokio::test(start_paused = true)]
    async fn endorsers_that_never_answer_are_dissenters() {
        let hubs = valid_hubs();
        let orderer = MockOrderer::accepting(hubs.clone());
        let endorsers = [MockEndorser::hanging("peer0"), MockEndorser::hanging("peer1")];
        let session = session(&endorsers, orderer.clone(), &hubs);

        let err = coordinator()
            .execute(
                &session,
                &identity("alice"),
                &invocation(),
                ProposalKind::Invoke,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TransactionError::EndorsementDisagreement { .. }));
        assert_eq!(err.nodes(), [&NodeId::from("peer0"), &NodeId::from("peer1")]);
        assert_eq!(orderer.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_fails_confirmation_after_event_timeout() {
        let hubs = vec![
            MockEventHub::new("peer0", HubBehavior::Fire(ValidationCode::Valid)),
            MockEventHub::new("peer1", HubBehavior::Never),
        ];
        let orderer = MockOrderer::accepting(hubs.clone());
        let endorsers = [MockEndorser::ok("peer0"), MockEndorser::ok("peer1")];
        let session = session(&endorsers, orderer, &hubs);

        let started = Instant::now();
        let err = coordinator()
            .execute(
                &session,
                &identity("alice"),
                &invocation(),
                ProposalKind::Invoke,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(started.elapsed() >= Duration::from_secs(30));

        assert!(matches!(err, TransactionError::ConfirmationTimeout { .. }));
        assert_eq!(err.nodes(), vec![&NodeId::from("peer1")]);
        assert!(err.to_string().contains("REQUEST_TIMEOUT"));
        let result = err.result().unwrap();
        assert!(!result.success());
        assert!(result.outcomes()[0].is_valid());
        assert!(released(&hubs));
    }

    #[tokio::test]
    async fn invalid_commit_is_reported_per_node() {
        let hubs = vec![
            MockEventHub::new("peer0", HubBehavior::Fire(ValidationCode::Valid)),
            MockEventHub::new("peer1", HubBehavior::Fire(ValidationCode::MvccReadConflict)),
        ];
        let orderer = MockOrderer::accepting(hubs.clone());
        let endorsers = [MockEndorser::ok("peer0"), MockEndorser::ok("peer1")];
        let session = session(&endorsers, orderer, &hubs);

        let err = coordinator()
            .execute(
                &session,
                &identity("alice"),
                &invocation(),
                ProposalKind::Invoke,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::ConfirmationInvalid { .. }));
        assert_eq!(err.nodes(), vec![&NodeId::from("peer1")]);
        assert!(err.to_string().contains("MVCC_READ_CONFLICT"));
    }

    #[tokio::test(start_paused = true)]
    async fn ordering_failure_does_not_wait_for_events() {
        let hubs = vec![
            MockEventHub::new("peer0", HubBehavior::Never),
            MockEventHub::new("peer1", HubBehavior::Never),
        ];
        let orderer = MockOrderer::rejecting(OrderingStatus::ServiceUnavailable);
        let endorsers = [MockEndorser::ok("peer0"), MockEndorser::ok("peer1")];
        let session = session(&endorsers, orderer.clone(), &hubs);

        let started = Instant::now();
        let err = coordinator()
            .execute(
                &session,
                &identity("alice"),
                &invocation(),
                ProposalKind::Invoke,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        match err {
            TransactionError::OrderingRejected { status, phase, .. } => {
                assert_eq!(status, Some(OrderingStatus::ServiceUnavailable));
                assert_eq!(phase, Phase::Ordering);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(orderer.calls(), 1);
        assert!(released(&hubs));
    }

    #[tokio::test]
    async fn every_run_gets_its_own_transaction_id() {
        let hubs = valid_hubs();
        let orderer = MockOrderer::accepting(hubs.clone());
        let endorsers = [MockEndorser::ok("peer0"), MockEndorser::ok("peer1")];
        let session = session(&endorsers, orderer.clone(), &hubs);
        let alice = identity("alice");
        let coordinator = coordinator();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let result = coordinator
                .execute(
                    &session,
                    &alice,
                    &invocation(),
                    ProposalKind::Invoke,
                    &CancellationToken::new(),
                )
                .await
                .unwrap();
            ids.push(result.tx_id().clone());
        }
        assert_ne!(ids[0], ids[1]);
        assert_eq!(orderer.calls(), 2);
    }

    #[tokio::test]
    async fn concurrent_runs_share_hubs() {
        let hubs = valid_hubs();
        let orderer = MockOrderer::accepting(hubs.clone());
        let endorsers = [MockEndorser::ok("peer0"), MockEndorser::ok("peer1")];
        let session = session(&endorsers, orderer, &hubs);
        let alice = identity("alice");
        let coordinator = coordinator();
        let cancel = CancellationToken::new();
        let invocation = invocation();

        let (a, b) = tokio::join!(
            coordinator.execute(&session, &alice, &invocation, ProposalKind::Invoke, &cancel),
            coordinator.execute(&session, &alice, &invocation, ProposalKind::Invoke, &cancel),
        );
        assert!(a.unwrap().success());
        assert!(b.unwrap().success());
        assert!(released(&hubs));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_releases_subscriptions() {
        let hubs = vec![MockEventHub::new("peer0", HubBehavior::Never)];
        let orderer = MockOrderer::accepting(hubs.clone());
        let endorsers = [MockEndorser::ok("peer0")];
        let session = session(&endorsers, orderer, &hubs);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = coordinator()
            .execute(
                &session,
                &identity("alice"),
                &invocation(),
                ProposalKind::Invoke,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(matches!(err, TransactionError::Cancelled { .. }));
        assert!(released(&hubs));
    }

    #[tokio::test]
    async fn cancelled_before_start_sends_nothing() {
        let hubs = valid_hubs();
        let orderer = MockOrderer::accepting(hubs.clone());
        let endorsers = [MockEndorser::ok("peer0")];
        let session = session(&endorsers, orderer.clone(), &hubs);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = coordinator()
            .execute(&session, &identity("alice"), &invocation(), ProposalKind::Invoke, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransactionError::Cancelled {
                phase: Phase::Proposing,
                ..
            }
        ));
        assert_eq!(endorsers[0].calls(), 0);
        assert_eq!(orderer.calls(), 0);
    }

    #[tokio::test]
    async fn query_returns_payload_without_ordering() {
        let hubs = valid_hubs();
        let orderer = MockOrderer::accepting(hubs.clone());
        let endorsers = [MockEndorser::ok("peer0"), MockEndorser::ok("peer1")];
        let session = session(&endorsers, orderer.clone(), &hubs);

        let result = coordinator()
            .query(&session, &identity("alice"), &invocation(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.payload, b"result");
        assert_eq!(orderer.calls(), 0);
        assert!(hubs.iter().all(|hub| hub.leases() == 0));

        let failing = [MockEndorser::ok("peer0"), MockEndorser::with_status("peer1", 500)];
        let session = crate::testing::session(&failing, orderer, &hubs);
        assert!(matches!(
            coordinator()
                .query(&session, &identity("alice"), &invocation(), &CancellationToken::new())
                .await,
            Err(TransactionError::EndorsementDisagreement { .. })
        ));
    }
}
