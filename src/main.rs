//! ipxd - image transform server
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use ipxd::cli::{Cli, Commands};
use ipxd::config::ConfigManager;
use ipxd::error::IpxResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> IpxResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    // Config warnings are emitted before the configured subscriber exists
    let config = {
        let startup = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_env_filter(EnvFilter::new("ipxd=warn"))
            .finish();
        let _guard = tracing::subscriber::set_default(startup);
        config_manager.load().await
    };

    // Logging: 0 = warn (info for serve), 1 = info, 2+ = debug; RUST_LOG wins
    let default_level = match (cli.verbose, &cli.command) {
        (0, Commands::Serve(_)) => "ipxd=info",
        (0, _) => "ipxd=warn",
        (1, _) => "ipxd=info",
        _ => "ipxd=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = config
        .as_ref()
        .is_ok_and(|c| c.logging.format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let config = config?;

    match cli.command {
        Commands::Serve(args) => ipxd::cli::commands::serve(args, &config).await,
        Commands::Config(args) => {
            ipxd::cli::commands::config(args, &config, &config_manager).await
        }
        Commands::Cache(args) => ipxd::cli::commands::cache(args, &config).await,
    }
}
