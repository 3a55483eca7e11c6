//! CLI module for Meridian
//!
//! # Commands
//!
//! - `serve` - Start the gateway HTTP server
//! - `config init` - Write a commented example configuration
//! - `config validate` - Load and validate a configuration file
//! - `completions` - Generate shell completions
//!
//! # Example
//!
//! ```bash
//! # Start server with default config
//! meridian serve
//!
//! # Check a config before deploying it
//! meridian config validate -c production.toml
//!
//! # Generate shell completions
//! meridian completions bash > ~/.bash_completion.d/meridian
//! ```

pub mod completions;
pub mod config;
pub mod serve;

pub use completions::handle_completions;
pub use config::{handle_config_init, handle_config_validate};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Meridian - routing and semantic-cache gateway
#[derive(Parser, Debug)]
#[command(
    name = "meridian",
    version,
    about = "Routing and semantic-cache gateway for text-generation providers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway server
    Serve(ServeArgs),
    /// Configuration utilities
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "meridian.toml")]
    pub config: PathBuf,

    /// Override server port
    #[arg(short, long, env = "MERIDIAN_PORT")]
    pub port: Option<u16>,

    /// Override server host
    #[arg(short = 'H', long, env = "MERIDIAN_HOST")]
    pub host: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "MERIDIAN_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Disable the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Run without the persistent store even if configured
    #[arg(long)]
    pub no_store: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Initialize a new configuration file
    Init(ConfigInitArgs),
    /// Validate a configuration file
    Validate(ConfigValidateArgs),
}

#[derive(Args, Debug)]
pub struct ConfigInitArgs {
    /// Output file path
    #[arg(short, long, default_value = "meridian.toml")]
    pub output: PathBuf,

    /// Overwrite existing file
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigValidateArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "meridian.toml")]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
