use std::process::ExitCode;

use clap::Parser;
use figment::{Figment, providers::Env};
use tracing::{error, info};

use odekake::app::App;
use odekake::cli::Args;
use odekake::config::Config;
use odekake::logging::setup_logging;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config and setup logging before App::new() so startup logs are never silently dropped
    let early_config = Figment::new()
        .merge(Env::raw())
        .extract::<Config>()
        .expect("Failed to load config for logging setup");
    setup_logging(&early_config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting odekake"
    );

    let app = match App::new().await {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "Failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "Application error");
            ExitCode::FAILURE
        }
    }
}
