use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use braid::config::{AppConfig, LoggingConfig};

#[derive(Parser)]
#[command(name = "braid", about = "Cross-protocol orchestration engine", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "BRAID_CONFIG", default_value = "braid.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the configuration and print the effective values
    CheckConfig,
    /// List the operations the gateway dispatches
    Ops,
}

fn init_logging(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };
    init_logging(&config.logging);

    match cli.command {
        Command::CheckConfig => println!("{config:#?}"),
        Command::Ops => {
            for operation in braid::gateway::OPERATIONS {
                println!("{operation}");
            }
        }
    }
}
