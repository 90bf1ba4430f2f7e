//! escrow CLI entry point
//!
//! Runs escrow flows against an in-process ledger, explains failure text and
//! prints the effective configuration.

mod demo;

use anyhow::Context;
use clap::Parser;
use escrow_orchestrator::{explain, FailureKind, OrchestratorConfig};
use tracing_subscriber::EnvFilter;

/// Job escrow orchestrator toolchain
#[derive(Parser, Debug)]
#[command(name = "escrow", version, about)]
struct Cli {
    /// Config file layered under ESCROW_* environment variables
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run an escrow flow on a fresh in-process ledger
    Run {
        #[arg(value_enum)]
        flow: demo::Flow,

        /// Ledger chain id
        #[arg(long, default_value_t = 84532)]
        chain_id: u64,
    },
    /// Translate wallet or node failure text into the message shown to users
    Explain {
        /// Failure text as reported by the wallet or node
        text: Vec<String>,
    },
    /// Print the effective orchestrator configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config =
        OrchestratorConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Run { flow, chain_id } => demo::run(flow, chain_id, config).await?,
        Commands::Explain { text } => {
            let failure = explain(&text.join(" "), FailureKind::NetworkOrInfrastructureFailure);
            println!("{}", serde_json::to_string_pretty(&failure)?);
        }
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["escrow", "run", "dispute", "--chain-id", "7"]).unwrap();
        match cli.command {
            Commands::Run { flow, chain_id } => {
                assert_eq!(flow, demo::Flow::Dispute);
                assert_eq!(chain_id, 7);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_explain_joins_words() {
        let cli = Cli::try_parse_from(["escrow", "explain", "user", "rejected", "it"]).unwrap();
        match cli.command {
            Commands::Explain { text } => assert_eq!(text.join(" "), "user rejected it"),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_flow_is_rejected() {
        assert!(Cli::try_parse_from(["escrow", "run", "refund-everyone"]).is_err());
    }
}
