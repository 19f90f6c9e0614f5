//! CLI for ackline
//!
//! Subcommands:
//! - `server`: run the TCP ingest server
//! - `device`: run the simulated device through its demo sequence

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use ackline::client::Device;
use ackline::config::{Settings, load_config, load_config_from};
use ackline::transport::IngestServer;
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ackline", version, about = "Acknowledged telemetry ingest over TCP")]
struct Cli {
    /// Configuration file (extension optional), `config/default` if omitted
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the ingest server
    Server {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Audit log file to append to
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Run the device simulator's demo sequence against a server
    Device {
        /// Server host
        #[arg(long)]
        host: Option<String>,
        /// Server port
        #[arg(long)]
        port: Option<u16>,
        /// Boot sequence number
        #[arg(long)]
        boot_seq: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let loaded = match cli.config.as_deref() {
        Some(file) => load_config_from(file),
        None => load_config(),
    };
    let mut settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            ackline::utils::logging::init("info");
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    ackline::utils::logging::init(&settings.logging.level);

    match cli.command {
        Command::Server {
            host,
            port,
            log_file,
        } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(path) = log_file {
                settings.server.output_path = path;
            }
            run_server(settings).await
        }
        Command::Device {
            host,
            port,
            boot_seq,
        } => {
            if let Some(host) = host {
                settings.device.host = host;
            }
            if let Some(port) = port {
                settings.device.port = port;
            }
            if let Some(boot_seq) = boot_seq {
                settings.device.boot_seq = boot_seq;
            }
            run_device(settings).await
        }
    }
}

async fn run_server(settings: Settings) -> ExitCode {
    let mut server = match IngestServer::bind(settings.server).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to start server");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        _ = server.run() => {
            error!("Accept loop exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Cleaning up.");
        }
    }

    if let Err(e) = server.into_sink().close().await {
        error!(error = %e, "Failed to close audit log");
    }
    info!("Server stopped");
    ExitCode::SUCCESS
}

async fn run_device(settings: Settings) -> ExitCode {
    let mut device = Device::new(&settings.device);
    info!(
        addr = %settings.device.addr(),
        boot_seq = device.boot_seq(),
        "Starting device demo sequence"
    );

    let summary = device.run_demo(Duration::from_millis(500)).await;
    if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
