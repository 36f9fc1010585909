//! Main entry point for the mrt-downloader CLI

use clap::Parser;
use mrt_downloader::cli::download::exit_code;
use mrt_downloader::cli::{Cli, Commands};
use mrt_downloader::shutdown::{self, ShutdownCoordinator};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing(verbose: bool) {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let default_level = if verbose {
        "mrt_downloader=debug"
    } else {
        "mrt_downloader=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so JSON summaries on stdout stay machine-readable
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    // Argument errors exit 1; help and version exit 0
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing(cli.verbose);

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = mrt_downloader::metrics::init_metrics(addr).await {
            warn!(error = %e, "Metrics exporter not started");
        }
    }

    // Install global shutdown coordinator and Ctrl+C handler
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    shutdown::install_ctrl_c_handler(shutdown.clone());

    // Execute command
    let result = match cli.command {
        Commands::Download(ref args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map(|summary| exit_code(&summary, args.strict, shutdown.is_shutdown_requested()))
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Collectors(ref cmd) => cmd
            .execute(cli.cache_file.as_deref())
            .await
            .map(|_| 0),
        Commands::Cache(ref cmd) => cmd
            .execute(cli.cache_file.as_deref(), cli.output_format)
            .await
            .map(|_| 0)
            .map_err(|e| anyhow::anyhow!(e)),
    };

    // Handle result
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
