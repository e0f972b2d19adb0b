use crate::config::Config;
use crate::error::{TransactionError, TransportError};
use crate::ordering::OrderingSubmitter;
use crate::proposal::{self, ProposalRequest};
use crate::remote::{RemoteEndorser, RemoteEventHub, RemoteOrderer};
use crate::transaction::{CombinedEndorsement, EndorsementResponse, OrderingAck};

use std::collections::HashMap;
use std::fmt;
use std::fs::read_to_string;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use ed25519_dalek::Keypair;
use gate_common::crypto::{self, PublicKeyBytes};
use gate_common::{
    new_nonce, Endorsement, Envelope, NodeId, Proposal, ProposalKind, SignedProposal,
    TransactionId, ValidationCode,
};
use log::{debug, info};
use tokio::sync::{oneshot, Mutex};

/// Fired at most once with the commit code, or with the reason the hub gave up.
pub type TxEventReceiver = oneshot::Receiver<Result<ValidationCode, String>>;

#[async_trait]
pub trait Endorser: Send + Sync {
    fn node(&self) -> &NodeId;

    async fn propose(&self, proposal: &SignedProposal) -> Result<Endorsement, TransportError>;
}

#[async_trait]
pub trait Orderer: Send + Sync {
    fn node(&self) -> &NodeId;

    async fn broadcast(&self, envelope: &Envelope) -> Result<OrderingAck, TransportError>;
}

/// Commit notification channel of one peer.
///
/// `connect` and `disconnect` are reference counted so one hub can be shared
/// by every in-flight transaction: each `connect` takes a lease (dialing only
/// when none is outstanding) and each `disconnect` gives one back, closing
/// the link with the last lease.
#[async_trait]
pub trait EventHub: Send + Sync {
    fn node(&self) -> &NodeId;

    fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<(), TransportError>;

    fn disconnect(&self);

    async fn register_tx_event(
        &self,
        tx_id: &TransactionId,
    ) -> Result<TxEventReceiver, TransportError>;

    fn unregister_tx_event(&self, tx_id: &TransactionId);
}

pub struct Identity {
    name: String,
    msp_id: String,
    keypair: Keypair,
}

impl Identity {
    pub fn new(name: impl Into<String>, msp_id: impl Into<String>, keypair: Keypair) -> Self {
        Self {
            name: name.into(),
            msp_id: msp_id.into(),
            keypair,
        }
    }

    pub fn from_pem_file(
        name: impl Into<String>,
        msp_id: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let pem = read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Self::new(name, msp_id, crypto::keypair_from_pem(&pem)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        self.keypair.public.to_bytes()
    }

    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        crypto::sign(&self.keypair, msg)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("msp_id", &self.msp_id)
            .field("public_key", &crypto::publickey_to_base64(self.public_key()))
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub channel: String,
    pub chaincode_id: String,
    pub function: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(
        channel: impl Into<String>,
        chaincode_id: impl Into<String>,
        function: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chaincode_id: chaincode_id.into(),
            function: function.into(),
            args,
        }
    }
}

#[derive(Clone)]
pub struct ChannelHandle {
    name: String,
    endorsers: Vec<Arc<dyn Endorser>>,
    submitter: Arc<OrderingSubmitter>,
}

impl ChannelHandle {
    pub fn new(
        name: impl Into<String>,
        endorsers: Vec<Arc<dyn Endorser>>,
        orderer: Arc<dyn Orderer>,
    ) -> Self {
        Self {
            name: name.into(),
            endorsers,
            submitter: Arc::new(OrderingSubmitter::new(orderer)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endorsers(&self) -> &[Arc<dyn Endorser>] {
        &self.endorsers
    }

    pub fn submitter(&self) -> &OrderingSubmitter {
        &self.submitter
    }
}

#[derive(Clone)]
pub struct SessionContext {
    org: String,
    identities: HashMap<String, Arc<Identity>>,
    channels: HashMap<String, ChannelHandle>,
    event_hubs: Vec<Arc<dyn EventHub>>,
}

impl SessionContext {
    pub fn new(
        org: impl Into<String>,
        identities: Vec<Identity>,
        channels: Vec<ChannelHandle>,
        event_hubs: Vec<Arc<dyn EventHub>>,
    ) -> Self {
        Self {
            org: org.into(),
            identities: identities
                .into_iter()
                .map(|identity| (identity.name.clone(), Arc::new(identity)))
                .collect(),
            channels: channels
                .into_iter()
                .map(|channel| (channel.name.clone(), channel))
                .collect(),
            event_hubs,
        }
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn identity(&self, user: &str) -> Result<Arc<Identity>, TransactionError> {
        self.identities
            .get(user)
            .cloned()
            .ok_or_else(|| self.session_error(anyhow!("user {user} is not enrolled")))
    }

    pub fn channel(&self, name: &str) -> Result<&ChannelHandle, TransactionError> {
        self.channels
            .get(name)
            .ok_or_else(|| self.session_error(anyhow!("unknown channel {name}")))
    }

    pub fn event_hubs(&self) -> &[Arc<dyn EventHub>] {
        &self.event_hubs
    }

    pub fn new_transaction_id(&self, identity: &Identity) -> (TransactionId, Vec<u8>) {
        let nonce = new_nonce();
        (TransactionId::derive(&nonce, &identity.public_key()), nonce)
    }

    /// Builds and signs a proposal under a fresh transaction id. The channel
    /// is resolved first so a bad channel never gets an id.
    pub fn new_proposal(
        &self,
        identity: &Identity,
        invocation: &Invocation,
        kind: ProposalKind,
    ) -> Result<SignedProposal, TransactionError> {
        self.channel(&invocation.channel)?;
        let (tx_id, nonce) = self.new_transaction_id(identity);
        let proposal = Proposal {
            tx_id,
            channel: invocation.channel.clone(),
            chaincode_id: invocation.chaincode_id.clone(),
            function: invocation.function.clone(),
            args: invocation.args.clone(),
            kind,
            creator: identity.public_key(),
            nonce,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };
        let bytes = proposal
            .signing_bytes()
            .map_err(|e| self.session_error(e.into()))?;
        let signature = identity.sign(&bytes);
        debug!(
            "new proposal {} by {}@{}",
            proposal.tx_id, identity.name, identity.msp_id
        );
        Ok(SignedProposal {
            proposal,
            signature,
        })
    }

    pub fn proposal_request(
        &self,
        proposal: SignedProposal,
        timeout: Duration,
    ) -> Result<ProposalRequest, TransactionError> {
        let targets = self.channel(&proposal.proposal.channel)?.endorsers().to_vec();
        Ok(ProposalRequest {
            proposal,
            targets,
            timeout,
        })
    }

    pub async fn propose_operation(
        &self,
        request: &ProposalRequest,
    ) -> Result<Vec<EndorsementResponse>, TransactionError> {
        proposal::broadcast(request).await
    }

    pub async fn submit_ordered(
        &self,
        combined: CombinedEndorsement,
        identity: &Identity,
        timeout: Duration,
    ) -> Result<OrderingAck, TransactionError> {
        let channel = self.channel(&combined.proposal().proposal.channel)?;
        channel.submitter().submit(combined, identity, timeout).await
    }

    fn session_error(&self, source: anyhow::Error) -> TransactionError {
        TransactionError::Session {
            org: self.org.clone(),
            source,
        }
    }
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn session_context(&self, org: &str) -> anyhow::Result<SessionContext>;
}

pub struct ConfigSessionProvider {
    config: Config,
}

impl ConfigSessionProvider {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionProvider for ConfigSessionProvider {
    async fn session_context(&self, org: &str) -> anyhow::Result<SessionContext> {
        let org_config = self.config.organization(org)?;

        let mut identities = Vec::with_capacity(org_config.users.len());
        for user in org_config.users.keys() {
            let path = self.config.user_key_path(org, user)?;
            identities.push(Identity::from_pem_file(
                user.clone(),
                org_config.msp_id.clone(),
                path,
            )?);
        }

        let endorsers: HashMap<&NodeId, Arc<dyn Endorser>> = org_config
            .peers
            .iter()
            .map(|peer| {
                let endorser: Arc<dyn Endorser> =
                    Arc::new(RemoteEndorser::new(peer.name.clone(), peer.endpoint));
                (&peer.name, endorser)
            })
            .collect();
        let orderer: Arc<dyn Orderer> = Arc::new(RemoteOrderer::new(
            org_config.orderer.name.clone(),
            org_config.orderer.endpoint,
        ));

        let mut channels = Vec::with_capacity(org_config.channels.len());
        for (name, members) in &org_config.channels {
            let targets = members
                .iter()
                .map(|member| {
                    endorsers
                        .get(member)
                        .cloned()
                        .ok_or_else(|| anyhow!("channel {name} lists unknown peer {member}"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            channels.push(ChannelHandle::new(name.clone(), targets, orderer.clone()));
        }

        let event_hubs = org_config
            .peers
            .iter()
            .map(|peer| {
                Arc::new(RemoteEventHub::new(peer.name.clone(), peer.event_endpoint()))
                    as Arc<dyn EventHub>
            })
            .collect();

        info!(
            "session for {} ready: {} users, {} channels",
            org,
            identities.len(),
            channels.len()
        );
        Ok(SessionContext::new(org, identities, channels, event_hubs))
    }
}

/// One session per organization, created on first use and reused afterwards.
pub struct SessionRegistry {
    provider: Box<dyn SessionProvider>,
    sessions: Mutex<HashMap<String, Arc<SessionContext>>>,
}

impl SessionRegistry {
    pub fn new(provider: impl SessionProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            sessions: Default::default(),
        }
    }

    pub async fn session(&self, org: &str) -> Result<Arc<SessionContext>, TransactionError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(org) {
            return Ok(session.clone());
        }
        let session = self
            .provider
            .session_context(org)
            .await
            .map_err(|source| TransactionError::Session {
                org: org.to_string(),
                source,
            })?;
        let session = Arc::new(session);
        sessions.insert(org.to_string(), session.clone());
        Ok(session)
    }
}
