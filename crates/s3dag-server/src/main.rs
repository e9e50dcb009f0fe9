use anyhow::Context;
use clap::Parser;
use s3dag_server::{Node, ServerConfig};
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);

    let config = ServerConfig::load(cli.config.as_deref())?;
    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let running = Node::build(config)?.start()?;
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown requested");
    running.shutdown().await?;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
