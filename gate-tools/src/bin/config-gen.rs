use gate_client::config::{Config, OrdererConfig, OrgConfig, PeerConfig};
use gate_common::{crypto, NodeId};
use gate_node::config::{NodeConfig, NodeRole};

use std::collections::HashMap;
use std::fs::write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

const ORG: &str = "Org1";
const CHANNEL: &str = "mychannel";
const USER: &str = "admin";

#[derive(Debug, Parser)]
#[command(
    name = "config-gen",
    version = "0.1.0",
    author = "Shapooo",
    about = "Generate devnet node configs, keys and a client connection profile"
)]
struct Cli {
    /// Number of peers to generate
    #[arg(short, long, default_value = "2")]
    pub count: u16,
    /// Output path
    #[arg(short, long, default_value = "./")]
    pub output_path: PathBuf,
    /// Start port; peers take consecutive ports, the orderer the next one
    #[arg(short, long, default_value = "7051")]
    pub start_port: u16,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !cli.output_path.is_dir() {
        return Err(anyhow!("output path is not a directory"));
    }
    if cli.count == 0 {
        return Err(anyhow!("at least one peer is needed"));
    }
    if cli.count as u32 + cli.start_port as u32 > u16::MAX as u32 {
        return Err(anyhow!("port overflow"));
    }

    let peers = (0..cli.count)
        .map(|n| {
            let name = NodeId::new(format!("peer{n}.org1"));
            let addr = local_addr(cli.start_port + n)?;
            gen_node_files(&cli.output_path, node_config(name.clone(), NodeRole::Peer, addr))?;
            Ok(PeerConfig {
                name,
                endpoint: addr,
                event_endpoint: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let orderer = OrdererConfig {
        name: NodeId::new("orderer0"),
        endpoint: local_addr(cli.start_port + cli.count)?,
    };
    let mut orderer_node = node_config(orderer.name.clone(), NodeRole::Orderer, orderer.endpoint);
    orderer_node.deliver_to = peers.iter().map(|peer| peer.endpoint).collect();
    gen_node_files(&cli.output_path, orderer_node)?;

    gen_key_file(&cli.output_path.join(format!("{USER}.pem")))?;
    let profile = client_profile(peers, orderer);
    write(
        cli.output_path.join("client.yaml"),
        serde_yaml::to_string(&profile)?,
    )
    .context("writing client.yaml")?;
    Ok(())
}

fn local_addr(port: u16) -> Result<SocketAddr> {
    Ok(format!("127.0.0.1:{port}").parse()?)
}

fn node_config(name: NodeId, role: NodeRole, listen_addr: SocketAddr) -> NodeConfig {
    NodeConfig {
        key_path: PathBuf::from(format!("{name}.pem")),
        name,
        role,
        listen_addr,
        deliver_to: Vec::new(),
        reject_functions: Vec::new(),
        keypair: None,
    }
}

fn gen_node_files(dir: &Path, config: NodeConfig) -> Result<()> {
    gen_key_file(&dir.join(&config.key_path))?;
    let path = dir.join(format!("{}.yaml", config.name));
    write(&path, serde_yaml::to_string(&config)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn gen_key_file(path: &Path) -> Result<()> {
    let keypair = crypto::generate_keypair();
    let pem = crypto::keypair_to_pem(&keypair)?;
    write(path, pem).with_context(|| format!("writing {}", path.display()))?;
    write(
        path.with_extension("pub"),
        crypto::publickey_to_base64(keypair.public.to_bytes()),
    )?;
    Ok(())
}

fn client_profile(peers: Vec<PeerConfig>, orderer: OrdererConfig) -> Config {
    let members = peers.iter().map(|peer| peer.name.clone()).collect();
    let org = OrgConfig {
        msp_id: format!("{ORG}MSP"),
        users: HashMap::from([(USER.to_string(), PathBuf::from(format!("{USER}.pem")))]),
        peers,
        orderer,
        channels: HashMap::from([(CHANNEL.to_string(), members)]),
    };
    Config {
        proposal_timeout: Duration::from_millis(120_000),
        event_timeout: Duration::from_millis(30_000),
        ordering_timeout: Duration::from_millis(30_000),
        organizations: HashMap::from([(ORG.to_string(), org)]),
        base_dir: PathBuf::new(),
    }
}
