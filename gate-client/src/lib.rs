pub mod agreement;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod notification;
pub mod ordering;
pub mod proposal;
pub mod remote;
pub mod session;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use config::{Config, Timeouts};
pub use coordinator::TransactionCoordinator;
pub use error::{NodeFailure, Phase, TransactionError, TransportError};
pub use session::{
    ChannelHandle, Endorser, EventHub, Identity, Invocation, Orderer, SessionContext,
    SessionProvider, SessionRegistry,
};
pub use transaction::{
    CombinedEndorsement, CommitFailure, CommitOutcome, EndorsementResponse, OrderingAck,
    QueryResult, TransactionResult,
};
