pub mod client;
pub mod common;
pub mod server;

pub use client::{Client, Connection};
pub use common::Channel;
pub use server::Server;
