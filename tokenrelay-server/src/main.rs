#![cfg_attr(not(test), forbid(unsafe_code))]

//! `tokenrelay-server` entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;

#[derive(Debug, Parser)]
#[command(name = "tokenrelay-server")]
#[command(about = "Relays resumable text streams to any number of readers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind; overrides the config file and TOKENRELAY_PORT
        #[arg(long, short)]
        port: Option<u16>,

        /// Configuration file (.yaml, .yml or .json); defaults are used when omitted
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => {
            let config = Config::load_config(config, port).context("loading configuration")?;
            server::server::run(config).await
        }
    }
}
