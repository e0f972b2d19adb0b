use crate::config::{Config, Timeouts};
use crate::coordinator::TransactionCoordinator;
use crate::error::TransactionError;
use crate::session::{ConfigSessionProvider, Invocation, SessionProvider, SessionRegistry};
use crate::transaction::{QueryResult, TransactionResult};

use gate_common::ProposalKind;
use log::{info, trace};
use tokio_util::sync::CancellationToken;

pub struct Client {
    sessions: SessionRegistry,
    coordinator: TransactionCoordinator,
}

impl Client {
    pub fn new(config: Config) -> Self {
        trace!("new client with config: {:?}", config);
        let timeouts = config.timeouts();
        Self::with_provider(ConfigSessionProvider::new(config), timeouts)
    }

    pub fn with_provider(provider: impl SessionProvider + 'static, timeouts: Timeouts) -> Self {
        Self {
            sessions: SessionRegistry::new(provider),
            coordinator: TransactionCoordinator::new(timeouts),
        }
    }

    pub async fn submit_transaction(
        &self,
        org: &str,
        user: &str,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult, TransactionError> {
        self.run(org, user, invocation, ProposalKind::Invoke, cancel)
            .await
    }

    /// Deploys `version` of the chaincode, or upgrades to it when `upgrade`.
    pub async fn instantiate_or_upgrade(
        &self,
        org: &str,
        user: &str,
        invocation: &Invocation,
        version: &str,
        upgrade: bool,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult, TransactionError> {
        let version = version.to_string();
        let kind = if upgrade {
            ProposalKind::Upgrade { version }
        } else {
            ProposalKind::Instantiate { version }
        };
        self.run(org, user, invocation, kind, cancel).await
    }

    pub async fn query(
        &self,
        org: &str,
        user: &str,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, TransactionError> {
        let session = self.sessions.session(org).await?;
        let identity = session.identity(user)?;
        self.coordinator
            .query(&session, &identity, invocation, cancel)
            .await
    }

    async fn run(
        &self,
        org: &str,
        user: &str,
        invocation: &Invocation,
        kind: ProposalKind,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult, TransactionError> {
        let session = self.sessions.session(org).await?;
        let identity = session.identity(user)?;
        info!(
            "{}@{}: {:?} {}.{} on {}",
            user, org, kind, invocation.chaincode_id, invocation.function, invocation.channel
        );
        self.coordinator
            .execute(&session, &identity, invocation, kind, cancel)
            .await
    }
}
