use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
mod cli;
mod commands;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
    let cli = cli::Cli::parse();
    cli.execute()?;
    Ok(())
}
