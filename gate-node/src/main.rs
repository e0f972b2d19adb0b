use gate_node::{client_actor::NodeActor, config::NodeConfig};

use anyhow::Result;
use clap::{Arg, Command};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

#[tokio::main]
async fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Debug)
        .env()
        .init()?;
    let args = Command::new("gate-node")
        .about("Development ledger node: endorsing peer or orderer.")
        .version("0.1.0")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .action(clap::ArgAction::Set)
                .help(
                    "set node config file, defaults to `config/node.yaml' \
                     in the same directory as gate-node binary",
                ),
        )
        .get_matches();
    let config = if let Some(path) = args.get_one::<String>("config") {
        NodeConfig::from_path(path)?
    } else {
        NodeConfig::new()?
    };

    let name = config.name.clone();
    NodeActor::spawn(config).await?;
    tokio::signal::ctrl_c().await?;
    info!("{} shutting down", name);
    Ok(())
}
