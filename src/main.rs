mod cli;
mod config;
mod core;
mod dispatch;
mod download;
mod error;
mod install;
mod lifecycle;
mod models;
mod pin;
mod registry;
mod resolver;
mod store;
mod utils;

use clap::Parser;
use cli::Cli;
use config::Config;
use error::GitshuError;
use lifecycle::Lifecycle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let mut lifecycle = Lifecycle::new();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let result: error::Result<()> = match cli::usage_failure(&e) {
                Some(failure) => Err(failure),
                None => Ok(()),
            };
            std::process::exit(lifecycle.finish(&result));
        }
    };

    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let verbose = cli.debug || std::env::var_os("DEBUG").is_some();

    let result = match Config::load() {
        Ok(config) => cli.with_config(config).run(&mut lifecycle).await,
        Err(e) => Err(e),
    };

    let code = lifecycle.finish(&result);
    if let Err(e) = result {
        report(e, verbose);
    }

    std::process::exit(code);
}

fn report(error: GitshuError, verbose: bool) {
    eprintln!();
    utils::print_error(&error.to_string());

    if let GitshuError::UnknownCommand { available, .. } = &error {
        if !available.is_empty() {
            eprintln!("\nAvailable commands: {}", available.join(", "));
        }
    }

    if verbose {
        eprintln!("\n{:?}", anyhow::Error::from(error));
    }
}
