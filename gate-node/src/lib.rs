pub mod client_actor;
pub mod config;
pub mod orderer;
pub mod peer;
