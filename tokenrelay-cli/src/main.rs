#![cfg_attr(not(test), forbid(unsafe_code))]

//! `tokenrelay` command-line client.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use clap_complete::Shell;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    config::ConfigFormat,
    control::ControlArgs,
    follow::FollowArgs,
};

#[derive(Debug, Parser)]
#[command(name = "tokenrelay")]
#[command(about = "Follow, probe and cancel tokenrelay streams", long_about = None)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug); `RUST_LOG` wins when set
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a thread's stream, resuming where the last run stopped
    Follow(FollowArgs),

    /// Check whether a thread has a stream
    Probe(ControlArgs),

    /// Ask the server to stop a thread's producer
    Cancel(ControlArgs),

    /// Write a default server configuration file
    Config {
        /// File format
        #[arg(long, short, value_enum, default_value_t = ConfigFormat::Yaml)]
        format: ConfigFormat,

        /// Destination; `-` for stdout. Defaults to config.yaml or config.json
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completion {
        /// Target shell
        #[arg(long, short, value_enum)]
        shell: Shell,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Follow(args) => commands::follow::handle_follow(args).await,
        Commands::Probe(args) => commands::control::handle_probe(args).await,
        Commands::Cancel(args) => commands::control::handle_cancel(args).await,
        Commands::Config { format, output } => {
            commands::config::generate_config(format, output.as_deref())
        }
        Commands::Completion { shell } => {
            commands::completion::generate_completion(shell);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn follow_defaults() {
        let cli = Cli::try_parse_from(["tokenrelay", "follow", "--thread", "42"]).unwrap();
        let Commands::Follow(args) = cli.command else {
            panic!("expected follow");
        };
        assert_eq!(args.thread, "42");
        assert_eq!(args.server, "http://localhost:8080");
        assert_eq!(args.retry_delay_ms, 1000);
        assert_eq!(args.max_reconnects, 5);
        assert!(args.cursor_dir.is_none());
        assert!(!args.fresh);
    }

    #[test]
    fn verbosity_is_global() {
        let cli = Cli::try_parse_from(["tokenrelay", "probe", "--thread", "1", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn config_format_is_validated() {
        assert!(Cli::try_parse_from(["tokenrelay", "config", "--format", "toml"]).is_err());
        let cli = Cli::try_parse_from(["tokenrelay", "config", "-f", "json", "-o", "-"]).unwrap();
        let Commands::Config { format, output } = cli.command else {
            panic!("expected config");
        };
        assert_eq!(format, ConfigFormat::Json);
        assert_eq!(output, Some(PathBuf::from("-")));
    }
}
