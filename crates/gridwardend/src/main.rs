//! gridwardend — the gridwarden daemon.
//!
//! Supervises one node of the data grid: builds its configuration from
//! the command line, the environment and an optional node file, renders
//! the engine configuration template, runs the node, and restarts it
//! whenever TLS credentials are rotated on disk.
//!
//! # Usage
//!
//! ```text
//! gridwardend --off-heap 4096 --on-heap 2048 --cluster 10.0.0.2:47500..47509
//! ```

mod supervisor;

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,gridwarden=debug,gridwardend=debug";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "gridwardend", about = "gridwarden node supervisor", version)]
struct Cli {
    /// Node configuration file (TOML).
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Off-heap data region size in megabytes.
    #[arg(long = "off-heap", value_name = "MB")]
    off_heap: Option<u64>,

    /// Heap ceiling in megabytes.
    #[arg(long = "on-heap", value_name = "MB")]
    on_heap: Option<u64>,

    /// Local discovery port.
    #[arg(long = "spi-port", value_name = "PORT")]
    spi_port: Option<u16>,

    /// Discovery endpoint (`host`, `host:port` or `host:port..port`).
    /// Repeatable.
    #[arg(long = "cluster", value_name = "HOST:PORT")]
    cluster: Vec<String>,

    /// Stable node identity across restarts.
    #[arg(long)]
    consistent_id: Option<String>,

    /// Keep data on disk.
    #[arg(long)]
    persistence_enabled: bool,

    /// Directory holding the engine configuration templates.
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    install_panic_hook();

    if let Err(e) = supervisor::run(cli).await {
        let chain = format!("{e:#}");
        error!(error = %chain, "gridwardend failed");
        return Err(e);
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

/// Route panics, including those on engine threads, through tracing.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let thread = std::thread::current().name().unwrap_or("unnamed").to_string();
        error!(%message, %location, %thread, "panic");
    }));
}
