use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use natsapi::app::listen_to_signals;
use natsapi::lifecycle::WithLifecycle;
use natsapi::{App, EndpointOptions, NatsBus};
use runtime::{AppConfig, CliArgs};
use tokio_util::sync::CancellationToken;

mod handlers;

/// Demo service exposing a handful of example endpoints as remote
/// procedures over NATS.
#[derive(Parser)]
#[command(name = "echo-service")]
#[command(about = "Example natsapi service")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print current configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service
    Run,
    /// Check configuration without connecting to the bus
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        servers: None,
        print_config: cli.print_config,
        verbose: cli.verbose,
        mock: false,
    };

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    runtime::init_logging_from_config(&logging_config, &std::env::current_dir()?);
    tracing::info!("echo-service starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_service(config).await,
        Commands::Check => check_config(config).await,
    }
}

fn build_app(config: &AppConfig) -> Result<natsapi::BuiltApp> {
    let mut app = App::new(config.server.root_path.clone())
        .with_title(config.server.title.clone())
        .with_version(config.server.version.clone())
        .with_domain_errors(handlers::domain_error_catalog()?);
    if let Some(description) = &config.server.description {
        app = app.with_description(description.clone());
    }

    app.state()
        .register(Arc::new(handlers::EchoCounter::default()));

    app.add_request("foo", handlers::echo, EndpointOptions::new())?;
    app.add_request("lookup.RETRIEVE", handlers::lookup, EndpointOptions::new())?;
    app.add_request(
        "brokers.CREATE",
        handlers::create_broker,
        EndpointOptions::new(),
    )?;

    Ok(app.build()?)
}

async fn run_service(config: AppConfig) -> Result<()> {
    let built = build_app(&config)?;

    let bus = Arc::new(NatsBus::connect(&config.bus).await?);
    let service = built.into_service(bus);

    let cancel = CancellationToken::new();
    listen_to_signals(cancel.clone());

    let wrapped = WithLifecycle::new(service);
    wrapped
        .start(cancel.clone())
        .await
        .map_err(|e| anyhow::anyhow!("failed to start service: {e}"))?;

    cancel.cancelled().await;
    wrapped
        .stop(CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!("failed to stop service cleanly: {e}"))?;

    tracing::info!("echo-service stopped");
    Ok(())
}

async fn check_config(config: AppConfig) -> Result<()> {
    let _ = build_app(&config)?;
    println!("Configuration check passed");
    println!("{}", config.to_yaml()?);
    Ok(())
}
