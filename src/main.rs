use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use sax_transform::{
    Cli, ConfigManager, ResultTarget, TransformError, TransformerFactory, TransformerHandler,
};

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        "sax_transform=debug"
    } else {
        "sax_transform=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

enum Failure {
    /// Bad arguments or configuration
    Usage(anyhow::Error),
    /// The transformation ran but did not complete
    Transform(TransformError),
}

async fn run(cli: Cli) -> Result<(), Failure> {
    cli.validate().map_err(|msg| Failure::Usage(anyhow::anyhow!(msg)))?;

    let config = ConfigManager::load_config(&cli)
        .await
        .context("Failed to load configuration")
        .map_err(Failure::Usage)?;
    tracing::debug!(?config, "configuration loaded");

    let factory = TransformerFactory::from_config(&config);
    let mut handler = factory.new_transformer_handler();
    for (name, value) in &cli.params {
        handler
            .transformer_mut()
            .set_parameter(name, value.clone())
            .with_context(|| format!("Invalid parameter '{}'", name))
            .map_err(Failure::Usage)?;
    }

    let result = match &cli.output {
        Some(path) => ResultTarget::File(path.clone()),
        None => ResultTarget::stream(std::io::stdout()),
    };

    factory
        .transform_file(&cli.input, &mut handler, result)
        .map_err(Failure::Transform)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Usage(err)) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(2)
        }
        // Already delivered to the listener
        Err(Failure::Transform(
            err @ (TransformError::Aborted(_) | TransformError::Parse { .. }),
        )) => {
            tracing::debug!(error = %err, "transformation stopped");
            ExitCode::from(1)
        }
        Err(Failure::Transform(err)) => {
            eprintln!("Error: {}", err);
            ExitCode::from(1)
        }
    }
}
