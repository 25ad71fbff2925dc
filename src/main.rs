mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use relaybox::admin::Admin;
use relaybox::api::{self, AppState};
use relaybox::config::{self, Config};
use relaybox::engine::Engine;
use relaybox::ledger::{FjallLedger, LedgerKey};
use relaybox::observability::Metrics;
use relaybox::shutdown::install_signal_handler;
use relaybox::status::StatusReporter;
use tracing_subscriber::EnvFilter;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_from_path(cli.config.unwrap_or_else(config::config_path))?;

    match cli.command {
        Commands::Run(args) => {
            let cancel = install_signal_handler()?;
            let engine = Engine::open(config, cancel.clone())?;

            let server = if args.serve {
                let address = args.address.unwrap_or(engine.config().server.bind_addr);
                let state = AppState::new(engine.ledger(), engine.metrics());
                let stop = cancel.clone();
                Some(tokio::spawn(async move { api::run(address, state, stop).await }))
            } else {
                None
            };

            let result = engine.run_all().await;
            if let Some(server) = server {
                // Partitions may finish before a shutdown signal; keep serving until then
                server.await??;
            }
            result?;
        }
        Commands::Partition(args) => {
            let cancel = install_signal_handler()?;
            let engine = Engine::open(config, cancel)?;
            let stats = engine.partition_worker(&args.id)?.run().await;
            engine.persist()?;
            println!("{}", serde_json::to_string_pretty(&stats?)?);
        }
        Commands::Watch(args) => {
            let cancel = install_signal_handler()?;
            let engine = Engine::open(config, cancel)?;
            let watcher = engine.watcher(&args.name)?;
            let result = if args.once {
                watcher.once().await
            } else {
                watcher.run().await
            };
            engine.persist()?;
            result?;
        }
        Commands::Status(args) => {
            let reporter = StatusReporter::new(open_ledger(&config)?);
            let json = match (args.partition, args.watcher) {
                (_, Some(watcher)) => serde_json::to_string_pretty(&reporter.watcher(&watcher)?)?,
                (Some(partition), None) => {
                    serde_json::to_string_pretty(&reporter.summary(&partition)?)?
                }
                (None, None) => serde_json::to_string_pretty(&reporter.overview()?)?,
            };
            println!("{json}");
        }
        Commands::Failures(args) => {
            let reporter = StatusReporter::new(open_ledger(&config)?);
            println!(
                "{}",
                serde_json::to_string_pretty(&reporter.failures(&args.partition)?)?
            );
        }
        Commands::Reset(args) => {
            let ledger = open_ledger(&config)?;
            let admin = Admin::new(ledger.clone());
            match (args.item, args.destination) {
                (Some(item), Some(destination)) => {
                    let entry = admin.reset(&LedgerKey::new(&args.partition, item, destination))?;
                    println!("{}", serde_json::to_string_pretty(&entry)?);
                }
                _ => {
                    let reset = admin.reset_partition(&args.partition)?;
                    println!("Reset {} abandoned entries in {}", reset.len(), args.partition);
                }
            }
            ledger.persist()?;
        }
        Commands::Serve(args) => {
            let cancel = install_signal_handler()?;
            let address = args.address.unwrap_or(config.server.bind_addr);
            let state = AppState::new(open_ledger(&config)?, Arc::new(Metrics::new()));
            api::run(address, state, cancel).await?;
        }
    }

    Ok(())
}

fn open_ledger(config: &Config) -> Result<Arc<FjallLedger>, AnyError> {
    Ok(Arc::new(FjallLedger::open(&config.engine.ledger_path)?))
}
