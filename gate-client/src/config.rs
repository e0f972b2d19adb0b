use std::collections::HashMap;
use std::env::current_exe;
use std::fs::read_to_string;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use gate_common::NodeId;
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_PROPOSAL_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_EVENT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_ORDERING_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(
        default = "default_proposal_timeout",
        deserialize_with = "parse_milliseconds",
        serialize_with = "serialize_milliseconds",
        rename = "proposal_timeout_ms"
    )]
    pub proposal_timeout: Duration,
    #[serde(
        default = "default_event_timeout",
        deserialize_with = "parse_milliseconds",
        serialize_with = "serialize_milliseconds",
        rename = "event_timeout_ms"
    )]
    pub event_timeout: Duration,
    #[serde(
        default = "default_ordering_timeout",
        deserialize_with = "parse_milliseconds",
        serialize_with = "serialize_milliseconds",
        rename = "ordering_timeout_ms"
    )]
    pub ordering_timeout: Duration,
    pub organizations: HashMap<String, OrgConfig>,
    /// Directory relative key paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrgConfig {
    pub msp_id: String,
    #[serde(default)]
    pub users: HashMap<String, PathBuf>,
    pub peers: Vec<PeerConfig>,
    pub orderer: OrdererConfig,
    #[serde(default)]
    pub channels: HashMap<String, Vec<NodeId>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PeerConfig {
    pub name: NodeId,
    pub endpoint: SocketAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_endpoint: Option<SocketAddr>,
}

impl PeerConfig {
    pub fn event_endpoint(&self) -> SocketAddr {
        self.event_endpoint.unwrap_or(self.endpoint)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrdererConfig {
    pub name: NodeId,
    pub endpoint: SocketAddr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub proposal: Duration,
    pub event: Duration,
    pub ordering: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            proposal: default_proposal_timeout(),
            event: default_event_timeout(),
            ordering: default_ordering_timeout(),
        }
    }
}

impl Config {
    pub fn new() -> Result<Self> {
        let current_exe = current_exe()?;
        let config_path = current_exe
            .parent()
            .ok_or_else(|| anyhow!("executable has no parent directory"))?
            .join("config")
            .join("client.yaml");
        Self::from_path(config_path)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(anyhow!("config file {} not found, or not a file", path.display()));
        }
        let config_str =
            read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut config = Self::from_yaml(&config_str)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = serde_yaml::from_str::<Config>(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            proposal: self.proposal_timeout,
            event: self.event_timeout,
            ordering: self.ordering_timeout,
        }
    }

    pub fn organization(&self, org: &str) -> Result<&OrgConfig> {
        self.organizations
            .get(org)
            .ok_or_else(|| anyhow!("unknown organization {org}"))
    }

    pub fn user_key_path(&self, org: &str, user: &str) -> Result<PathBuf> {
        let path = self
            .organization(org)?
            .users
            .get(user)
            .ok_or_else(|| anyhow!("user {user} is not registered with {org}"))?;
        Ok(if path.is_absolute() {
            path.clone()
        } else {
            self.base_dir.join(path)
        })
    }

    fn validate(&self) -> Result<()> {
        for (name, org) in &self.organizations {
            for (channel, members) in &org.channels {
                if let Some(unknown) = members
                    .iter()
                    .find(|member| !org.peers.iter().any(|peer| &peer.name == *member))
                {
                    return Err(anyhow!(
                        "channel {channel} of {name} lists unknown peer {unknown}"
                    ));
                }
            }
        }
        Ok(())
    }
}

fn default_proposal_timeout() -> Duration {
    Duration::from_millis(DEFAULT_PROPOSAL_TIMEOUT_MS)
}

fn default_event_timeout() -> Duration {
    Duration::from_millis(DEFAULT_EVENT_TIMEOUT_MS)
}

fn default_ordering_timeout() -> Duration {
    Duration::from_millis(DEFAULT_ORDERING_TIMEOUT_MS)
}

fn parse_milliseconds<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millisecs: u64 = Deserialize::deserialize(d)?;
    Ok(Duration::from_millis(millisecs))
}

fn serialize_milliseconds<S>(duration: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_u64(duration.as_millis() as u64)
}
