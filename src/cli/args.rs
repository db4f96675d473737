//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// ipxd - image transform server with a source-validated disk cache
///
/// Serves `/_ipx/{modifiers}/{source}` from a local directory or
/// allow-listed remote hosts, caching every transformed image on disk.
#[derive(Parser, Debug)]
#[command(name = "ipxd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "IPXD_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve(ServeArgs),

    /// Show configuration
    Config(ConfigArgs),

    /// Inspect the disk cache
    Cache(CacheArgs),
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen port (overrides server.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind address (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show effective configuration
    Show,

    /// Show configuration file path
    Path,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show where a request is cached and whether the entry is valid
    Inspect {
        /// Modifier segment as it appears in the URL (e.g. w_200,f_webp)
        modifiers: String,

        /// Source path or URL
        source: String,
    },
}
