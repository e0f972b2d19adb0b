use gate_client::{Client, Config, Invocation, TransactionError};

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "gate", version, about = "Submit and query ledger transactions")]
struct Cli {
    /// Connection profile, defaults to `config/client.yaml' next to the binary
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "Org1")]
    org: String,
    #[arg(long, default_value = "admin")]
    user: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Endorse, order and confirm a chaincode invocation
    Invoke(Call),
    /// Evaluate a chaincode function without ordering it
    Query(Call),
    /// Instantiate or upgrade a chaincode
    Instantiate(Lifecycle),
}

#[derive(Debug, Args)]
struct Call {
    #[arg(long)]
    channel: String,
    #[arg(long)]
    cc_name: String,
    #[arg(long)]
    fcn: String,
    #[arg(long = "arg")]
    args: Vec<String>,
}

#[derive(Debug, Args)]
struct Lifecycle {
    #[arg(long)]
    channel: String,
    #[arg(long)]
    cc_name: String,
    #[arg(long)]
    cc_version: String,
    #[arg(long, default_value = "init")]
    fcn: String,
    #[arg(long = "init-arg")]
    init_args: Vec<String>,
    #[arg(long, default_value = "false")]
    upgrade: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::new()?,
    };
    let client = Client::new(config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let outcome = match cli.command {
        Command::Invoke(call) => {
            let invocation = Invocation::new(call.channel, call.cc_name, call.fcn, call.args);
            client
                .submit_transaction(&cli.org, &cli.user, &invocation, &cancel)
                .await
                .map(|result| {
                    info!("transaction {} committed", result.tx_id());
                    println!("{}", String::from_utf8_lossy(result.payload()));
                })
        }
        Command::Query(call) => {
            let invocation = Invocation::new(call.channel, call.cc_name, call.fcn, call.args);
            client
                .query(&cli.org, &cli.user, &invocation, &cancel)
                .await
                .map(|result| println!("{}", String::from_utf8_lossy(&result.payload)))
        }
        Command::Instantiate(lifecycle) => {
            let invocation = Invocation::new(
                lifecycle.channel,
                lifecycle.cc_name,
                lifecycle.fcn,
                lifecycle.init_args,
            );
            client
                .instantiate_or_upgrade(
                    &cli.org,
                    &cli.user,
                    &invocation,
                    &lifecycle.cc_version,
                    lifecycle.upgrade,
                    &cancel,
                )
                .await
                .map(|result| info!("transaction {} committed", result.tx_id()))
        }
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            report(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn report(e: &TransactionError) {
    error!("{}", e);
    if let Some(result) = e.result() {
        for outcome in result.outcomes() {
            match &outcome.failure {
                Some(failure) => error!("  {}: {}", outcome.node, failure),
                None => info!("  {}: committed", outcome.node),
            }
        }
    }
}
