//! creditgate CLI entry point.

mod cli;

use clap::Parser;
use cli::{Cli, Command, LogFormat};
use creditgate::{CurrencyId, EngineBuilder, IdentityKey, PackageId};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }

    info!("creditgate v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.load_config()?;

    if let Command::CheckConfig = cli.command {
        config.validate()?;
        return print_json(&serde_json::json!({
            "path": cli.config_path(),
            "packages": config.packages.len(),
            "currencies": config.currencies.len(),
            "sources": config.price.sources.len(),
            "recipients": config.distribution.len(),
            "exemptions": config.exemptions.len(),
        }));
    }

    let engine = EngineBuilder::new(config).build()?;

    match cli.command {
        Command::Packages { all } => {
            let packages = if all {
                engine.catalog().list_all()
            } else {
                engine.packages()
            };
            print_json(&packages)
        }
        Command::Quote {
            identity,
            package,
            currency,
        } => {
            let result = engine
                .quote(
                    &IdentityKey::new(identity),
                    &PackageId::new(package),
                    &CurrencyId::new(currency),
                )
                .await;
            match result {
                Ok(charge) => print_json(&charge),
                Err(e) => {
                    warn!("Quote failed: {}", e);
                    print_json(&serde_json::json!({ "error": e.user_message() }))?;
                    std::process::exit(if e.is_user_error() { 2 } else { 1 });
                }
            }
        }
        Command::Split { currency, amount } => {
            let plan = engine.settle(amount, &CurrencyId::new(currency))?;
            print_json(&plan)
        }
        Command::CheckConfig => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> color_eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
