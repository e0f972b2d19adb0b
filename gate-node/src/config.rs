use gate_common::{crypto, NodeId};

use std::env::current_exe;
use std::fs::read_to_string;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::Keypair;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Peer,
    Orderer,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct NodeConfig {
    pub name: NodeId,
    pub role: NodeRole,
    pub listen_addr: SocketAddr,
    /// PEM private key, relative to the config file.
    pub key_path: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deliver_to: Vec<SocketAddr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reject_functions: Vec<String>,
    #[serde(skip)]
    pub keypair: Option<Keypair>,
}

impl NodeConfig {
    pub fn new() -> Result<Self> {
        let current_exe = current_exe()?;
        let config_path = current_exe
            .parent()
            .ok_or_else(|| anyhow!("executable has no parent directory"))?
            .join("config")
            .join("node.yaml");
        Self::from_path(config_path)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(anyhow!("config file {} not found, or not a file", path.display()));
        }
        let config_str =
            read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut config = serde_yaml::from_str::<NodeConfig>(&config_str)?;

        let key_path = match path.parent() {
            Some(dir) if config.key_path.is_relative() => dir.join(&config.key_path),
            _ => config.key_path.clone(),
        };
        let pem = read_to_string(&key_path)
            .with_context(|| format!("reading key {}", key_path.display()))?;
        let keypair = crypto::keypair_from_pem(&pem)?;
        debug!(
            "{} pubkey is {}",
            config.name,
            crypto::publickey_to_base64(keypair.public.to_bytes())
        );
        config.keypair = Some(keypair);
        Ok(config)
    }
}
