//! The compaction scheduler daemon.
//!
//! # Usage
//!
//! ```text
//! compactd run --bucket-dir /var/lib/blocks --data-dir /var/lib/compactd --metrics-port 9464
//! compactd default-config > compactd.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use compactd::DaemonOptions;
use compactd_scheduler::CompactdConfig;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "compactd", about = "Compaction job scheduler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler.
    Run {
        /// Path to a compactd.toml file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for the job store (overrides storage.data_dir).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Bucket directory listing the tenants (overrides discovery.bucket_dir).
        #[arg(long)]
        bucket_dir: Option<PathBuf>,

        /// Serve Prometheus metrics on this port.
        #[arg(long)]
        metrics_port: Option<u16>,

        /// Log output format.
        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },

    /// Print the default configuration as TOML.
    DefaultConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,compactd=debug"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            bucket_dir,
            metrics_port,
            log_format,
        } => {
            init_tracing(log_format);
            let options = DaemonOptions {
                config,
                data_dir,
                bucket_dir,
                metrics_port,
            };
            compactd::run(options, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to listen for ctrl-c");
                }
            })
            .await
        }
        Command::DefaultConfig => {
            print!("{}", CompactdConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}
