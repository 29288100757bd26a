//! Command-line interface definition.

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::WrapErr;
use creditgate::EngineConfig;
use rust_decimal::Decimal;
use std::path::PathBuf;

/// Credit package pricing, payment splitting and throttling.
#[derive(Parser, Debug)]
#[command(name = "creditgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, env = "CREDITGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text", env = "CREDITGATE_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List purchasable credit packages.
    Packages {
        /// Include inactive packages.
        #[arg(long)]
        all: bool,
    },

    /// Price a package for an identity, counting against its rate limit.
    Quote {
        /// Requesting identity (wallet address).
        #[arg(long)]
        identity: String,

        /// Package id.
        #[arg(long)]
        package: String,

        /// Payment currency id.
        #[arg(long)]
        currency: String,
    },

    /// Split a payment across the configured recipients.
    Split {
        /// Currency the amount is denominated in.
        #[arg(long)]
        currency: String,

        /// Amount received.
        amount: Decimal,
    },

    /// Validate the configuration file.
    CheckConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

impl Cli {
    /// Path of the configuration file in use.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(EngineConfig::default_path)
    }

    /// Load the configuration file, applying CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_config(&self) -> color_eyre::Result<EngineConfig> {
        let path = self.config_path();
        let mut config = EngineConfig::from_file(&path)
            .wrap_err_with(|| format!("loading configuration from {}", path.display()))?;

        config.log_level.clone_from(&self.log_level);
        Ok(config)
    }
}
