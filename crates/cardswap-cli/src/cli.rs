//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Swap identity cards with a nearby device", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve your card until a peer has read it
    Give(ExchangeArgs),
    /// Read the card of the first peer found
    Take(ExchangeArgs),
    /// Serve your card and read the peer's at the same time
    Exchange(ExchangeArgs),
    /// Print the effective configuration as TOML
    Config,
}

/// Card fields and session limits shared by the exchange commands
#[derive(Args, Debug, Clone, Default)]
pub struct ExchangeArgs {
    /// Card id, overrides `[card] id`
    #[arg(long)]
    pub id: Option<i64>,

    /// Display name, overrides `[card] name`
    #[arg(short, long)]
    pub name: Option<String>,

    /// Job title, overrides `[card] title`
    #[arg(short, long)]
    pub title: Option<String>,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Keep the server up after the peer's card arrived
    #[arg(long)]
    pub keep_serving: bool,

    /// Print the received card as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_arguments() {
        let cli = Cli::try_parse_from([
            "cardswap", "exchange", "--id", "7", "--name", "Ada", "--title", "Engineer",
            "--timeout", "30", "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Commands::Exchange(args) = cli.command else {
            panic!("expected the exchange command");
        };
        assert_eq!(args.id, Some(7));
        assert_eq!(args.name.as_deref(), Some("Ada"));
        assert_eq!(args.timeout, Some(30));
        assert!(!args.keep_serving);
    }

    #[test]
    fn test_take_needs_no_card() {
        let cli = Cli::try_parse_from(["cardswap", "take", "--json"]).unwrap();
        let Commands::Take(args) = cli.command else {
            panic!("expected the take command");
        };
        assert!(args.json);
        assert!(args.name.is_none());
    }

    #[test]
    fn test_config_path_is_global() {
        let cli = Cli::try_parse_from(["cardswap", "config", "--config", "/tmp/cardswap.toml"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Config));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cardswap.toml")));
    }
}
