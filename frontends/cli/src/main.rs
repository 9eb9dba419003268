mod args;
mod commands;

use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable JSON.
    // Default to INFO level, can be overridden with RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let default_config = std::env::var_os("LEDGERBRIDGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ledgerbridge.yaml"));

    let args = match args::parse(std::env::args().skip(1), default_config) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, args::USAGE);
            std::process::exit(2);
        }
    };

    let output = commands::run(args).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
