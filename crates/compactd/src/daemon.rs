//! Daemon assembly: configuration, recovery and background loops.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use compactd_scheduler::{
    CompactdConfig, DirectoryTenantLister, MaintenanceParams, ResolvedConfig, Rotator, SchedulerMetrics,
    SystemClock, TenantDiscoverer, recover_trackers,
};
use compactd_state::JobStore;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// File name of the job store inside the data directory.
pub const DB_FILE: &str = "compactd.redb";

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub bucket_dir: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl DaemonOptions {
    /// Load the config file (or defaults), apply overrides and validate.
    pub fn load_config(&self) -> anyhow::Result<ResolvedConfig> {
        let mut config = match &self.config {
            Some(path) => CompactdConfig::from_file(path)?,
            None => CompactdConfig::default(),
        };
        if let Some(data_dir) = &self.data_dir {
            config.storage.data_dir = data_dir.clone();
        }
        if let Some(bucket_dir) = &self.bucket_dir {
            config.discovery.bucket_dir = Some(bucket_dir.clone());
        }
        Ok(config.resolve()?)
    }
}

/// Run the daemon until `shutdown_signal` resolves.
pub async fn run(options: DaemonOptions, shutdown_signal: impl Future<Output = ()>) -> anyhow::Result<()> {
    let config = options.load_config()?;
    let bucket_dir = config
        .bucket_dir
        .clone()
        .context("no bucket directory configured (set discovery.bucket_dir or pass --bucket-dir)")?;

    info!("compactd starting");

    // ── Job store ──────────────────────────────────────────────

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;
    let db_path = config.data_dir.join(DB_FILE);
    let store = Arc::new(JobStore::open(&db_path)?);
    info!(path = ?db_path, "job store opened");

    // ── Recovery ───────────────────────────────────────────────

    let rotator = Arc::new(Rotator::new());
    let metrics = Arc::new(SchedulerMetrics::new());
    let clock = Arc::new(SystemClock);
    let trackers = recover_trackers(&*store, &rotator, clock.clone(), config.max_leases, &metrics)?;

    let mut discoverer = TenantDiscoverer::new(
        DirectoryTenantLister::new(&bucket_dir),
        store.clone(),
        rotator.clone(),
        metrics.clone(),
    )
    .with_clock(clock)
    .with_allow_list(config.allow_list.clone())
    .with_max_leases(config.max_leases)
    .with_backoff(config.backoff)
    .with_interval(config.discovery_interval);
    discoverer.recover_from(&trackers);
    drop(trackers);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let discovery_shutdown = shutdown_rx.clone();
    let discovery_handle = tokio::spawn(async move {
        if let Err(e) = discoverer.run(discovery_shutdown).await {
            error!(error = %e, "tenant discovery stopped");
        }
    });

    let maintenance_handle = tokio::spawn(maintenance_loop(
        rotator.clone(),
        config.maintenance,
        config.maintenance_interval,
        shutdown_rx.clone(),
    ));

    let server_handle = match options.metrics_port {
        Some(port) => {
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "metrics server starting");
            let router = crate::http::build_router(metrics.clone());
            let mut server_shutdown = shutdown_rx.clone();
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            });
            Some(tokio::spawn(async move {
                if let Err(e) = server.await {
                    error!(error = %e, "metrics server failed");
                }
            }))
        }
        None => None,
    };

    shutdown_signal.await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // Wait for background tasks.
    let _ = discovery_handle.await;
    let _ = maintenance_handle.await;
    if let Some(handle) = server_handle {
        let _ = handle.await;
    }

    info!("compactd stopped");
    Ok(())
}

/// Run maintenance on every tracker each `interval` until shutdown.
pub async fn maintenance_loop(
    rotator: Arc<Rotator>,
    params: MaintenanceParams,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "maintenance loop started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let summary = rotator.run_maintenance(&params, false);
                if summary.failed > 0 {
                    warn!(
                        tenants = summary.tenants,
                        failed = summary.failed,
                        "maintenance failed for some tenants"
                    );
                } else {
                    debug!(
                        tenants = summary.tenants,
                        transitioned = summary.transitioned,
                        "maintenance pass complete"
                    );
                }
            }
            _ = shutdown.changed() => {
                info!("maintenance loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_config_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compactd.toml");
        std::fs::write(
            &path,
            "[discovery]\nbucket_dir = \"/from/file\"\n\n[storage]\ndata_dir = \"/from/file/data\"\n",
        )
        .unwrap();

        let options = DaemonOptions {
            config: Some(path),
            data_dir: Some(PathBuf::from("/override/data")),
            ..DaemonOptions::default()
        };
        let config = options.load_config().unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/override/data"));
        assert_eq!(config.bucket_dir, Some(PathBuf::from("/from/file")));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let options = DaemonOptions {
            config: Some(PathBuf::from("/nonexistent/compactd.toml")),
            ..DaemonOptions::default()
        };
        assert!(options.load_config().is_err());
    }

    #[tokio::test]
    async fn run_requires_bucket_dir() {
        let data = tempfile::tempdir().unwrap();
        let options = DaemonOptions {
            data_dir: Some(data.path().to_path_buf()),
            ..DaemonOptions::default()
        };

        let err = run(options, async {}).await.unwrap_err();
        assert!(err.to_string().contains("bucket"));
    }

    #[tokio::test]
    async fn maintenance_loop_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(maintenance_loop(
            Arc::new(Rotator::new()),
            MaintenanceParams::default(),
            Duration::from_millis(5),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop exits")
            .unwrap();
    }
}
