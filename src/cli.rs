use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "relaybox")]
#[command(about = "Resumable multi-destination media transfer engine", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $RELAYBOX_CONFIG or config/relaybox.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every configured partition and watcher
    Run(RunArgs),
    /// Run a single partition to completion
    Partition(PartitionArgs),
    /// Run a single watcher
    Watch(WatchArgs),
    /// Print partition summaries as JSON
    Status(StatusArgs),
    /// Print failed and abandoned entries of a partition as JSON
    Failures(FailuresArgs),
    /// Reset abandoned entries so they are retried on the next run
    Reset(ResetArgs),
    /// Serve the status API only
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Also serve the status API while running
    #[arg(long)]
    pub serve: bool,

    /// Status API address (overrides [server].bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct PartitionArgs {
    /// Partition id from the configuration
    pub id: String,
}

#[derive(clap::Args, Debug)]
pub struct WatchArgs {
    /// Watcher name from the configuration
    pub name: String,

    /// Run one cycle and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    /// Partition id; all partitions when omitted
    pub partition: Option<String>,

    /// Show a watcher report instead of a partition
    #[arg(long, conflicts_with = "partition")]
    pub watcher: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct FailuresArgs {
    pub partition: String,
}

#[derive(clap::Args, Debug)]
pub struct ResetArgs {
    pub partition: String,

    /// Reset only this item (requires --destination)
    #[arg(long, requires = "destination")]
    pub item: Option<String>,

    #[arg(long, requires = "item")]
    pub destination: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to (overrides [server].bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_once() {
        let cli = Cli::parse_from(["relaybox", "watch", "nas", "--once"]);
        assert!(matches!(
            cli.command,
            Commands::Watch(WatchArgs { ref name, once: true }) if name == "nas"
        ));
    }

    #[test]
    fn test_reset_item_requires_destination() {
        assert!(Cli::try_parse_from(["relaybox", "reset", "1999", "--item", "a"]).is_err());
        let cli = Cli::try_parse_from([
            "relaybox",
            "--config",
            "custom.toml",
            "reset",
            "1999",
            "--item",
            "a",
            "--destination",
            "archive",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
    }
}
