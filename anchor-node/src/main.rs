//! Operator CLI (spec.md §6 "Operator CLI (stable subset)"): `start`,
//! `batch --force`, `checkpoint --l2-root/--dao-root`, `status`. Exit code
//! 0 on success, 1 on any initialization or submission failure.

mod app;
mod config;

use std::process::ExitCode;

use app::App;
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "anchor-node", about = "Operator CLI for the anchor backbone")]
struct Cli {
    /// Path to the node's TOML configuration file.
    #[arg(long, short = 'c', default_value = "anchor-node.toml")]
    config: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Builds every service and runs the enabled scheduled loops until killed.
    Start(StartArgs),
    /// Forces an immediate Sequencer batch, bypassing the `batchInterval` wait.
    Batch {
        #[arg(long)]
        force: bool,
    },
    /// Forces an immediate checkpoint submission with the given roots.
    Checkpoint {
        #[arg(long = "l2-root")]
        l2_root: String,
        #[arg(long = "dao-root")]
        dao_root: String,
    },
    /// Reports whether the outbox store is reachable and its on-disk size.
    Status,
}

#[derive(Args)]
struct StartArgs {
    /// Runs only the Sequencer's scheduled batching loop.
    #[arg(long, conflicts_with_all = ["checkpoint", "all"])]
    sequencer: bool,
    /// Runs only the Checkpoint Service's scheduled loop.
    #[arg(long, conflicts_with_all = ["sequencer", "all"])]
    checkpoint: bool,
    /// Runs both the Sequencer and the Checkpoint Service (the default).
    #[arg(long, conflicts_with_all = ["sequencer", "checkpoint"])]
    all: bool,
}

fn parse_root(raw: &str, flag: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(raw.trim_start_matches("0x")).map_err(|e| anyhow::anyhow!("{flag} is not valid hex: {e}"))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("{flag} must be exactly 32 bytes"))?;
    Ok(array)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::from_toml_path(&cli.config)?;

    match cli.command {
        Command::Start(args) => {
            let (run_sequencer, run_checkpoint) = if args.sequencer {
                (true, false)
            } else if args.checkpoint {
                (false, true)
            } else {
                (true, true)
            };
            let app = Arc::new(App::build(&config).await?);
            app.start(run_sequencer, run_checkpoint).await?;
            tokio::signal::ctrl_c().await.ok();
            Ok(())
        }
        Command::Batch { force } => {
            if !force {
                anyhow::bail!("`batch` requires --force");
            }
            let app = App::build(&config).await?;
            match app.sequencer.force_batch_creation().await {
                Some(batch) => {
                    app.da_adapter.submit_batch(batch.clone()).await;
                    let output = serde_json::json!({
                        "id": batch.id,
                        "eventCount": batch.event_count,
                        "merkleRoot": format!("0x{}", hex::encode(batch.merkle_root)),
                    });
                    println!("{output}");
                    Ok(())
                }
                None => {
                    println!("no events");
                    Ok(())
                }
            }
        }
        Command::Checkpoint { l2_root, dao_root } => {
            let l2_root = parse_root(&l2_root, "--l2-root")?;
            let dao_root = parse_root(&dao_root, "--dao-root")?;
            let app = App::build(&config).await?;
            let inputs = checkpoint::CheckpointInputs {
                l2_root,
                dao_state_root: dao_root,
                batch_count: 0,
                event_count: 0,
            };
            let tx_hash = app.checkpoint.force_checkpoint(inputs).await?;
            println!("{}", serde_json::json!({ "txHash": tx_hash }));
            Ok(())
        }
        Command::Status => {
            let store = anchor_db::OutboxStore::open_read_only(&config.storage.path)?;
            let output = serde_json::json!({
                "dbPath": config.storage.path,
                "isOpen": true,
                "approximateSize": store.approximate_size(),
            });
            println!("{output}");
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("anchor-node: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("anchor-node: {e:#}");
            ExitCode::FAILURE
        }
    }
}
