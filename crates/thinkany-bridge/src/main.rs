//! thinkany-bridge daemon

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use thinkany_bridge::config::Config;
use thinkany_bridge::error::Result;
use thinkany_bridge::models::ModelRegistry;
use thinkany_bridge::proxy::ProxyServer;

/// OpenAI-compatible streaming proxy for the ThinkAny backend
#[derive(Parser)]
#[command(name = "thinkany-bridge")]
#[command(about = "An OpenAI-compatible streaming proxy for the ThinkAny backend")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the proxy server (default command)
    #[command(name = "serve")]
    Serve,
    /// Print the model table and exit
    #[command(name = "models")]
    Models,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
        Some(Command::Models) => print_models(cli.config),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,thinkany_bridge=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::load(config_path.as_deref())?;
    config.apply_env()?;
    Ok(config)
}

fn print_models(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = ModelRegistry::new(&config.models, &config.default_model)?;

    for spec in registry.specs() {
        let marker = if spec.name == registry.default_model() {
            " (default)"
        } else {
            ""
        };
        println!("{}\t{}\t{}{marker}", spec.name, spec.upstream_model, spec.mode);
    }
    Ok(())
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting thinkany-bridge");

    let config = load_config(config_path)?;
    config.validate()?;
    tracing::debug!(
        "Config loaded: {} models, {} credentials, session ttl {}s",
        config.models.len(),
        config.upstream.cookies.len(),
        config.session.ttl_secs
    );

    let proxy = ProxyServer::new(config);
    proxy.serve().await?;

    tracing::info!("thinkany-bridge stopped");
    Ok(())
}
