use anyhow::Result;
use clap::Parser;
use tracing::info;

use droplink::server::{self, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Create ~/.droplink directory if it doesn't exist
    let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let droplink_dir = format!("{home_dir}/.droplink");
    std::fs::create_dir_all(&droplink_dir)?;

    let log_path = format!("{droplink_dir}/droplink.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)?;

    // Log to both console and file
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    let writer = std::io::stdout.and(log_file);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(writer)
        .init();

    info!("Starting droplink share server");

    server::run_server(args).await
}
