use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back
/// to `info`. Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive run metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    units_resolved: AtomicU64,
    backend_runs: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    early_exits: AtomicU64,
    excluded: AtomicU64,
}

impl Telemetry {
    pub fn record_units_resolved(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.units_resolved.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_backend_run(&self) {
        self.backend_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_early_exit(&self) {
        self.early_exits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_excluded(&self) {
        self.excluded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            units_resolved: self.units_resolved.load(Ordering::Relaxed),
            backend_runs: self.backend_runs.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            early_exits: self.early_exits.load(Ordering::Relaxed),
            excluded: self.excluded.load(Ordering::Relaxed),
        }
    }

    pub fn backend_runs(&self) -> u64 {
        self.backend_runs.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub units_resolved: u64,
    pub backend_runs: u64,
    pub retries: u64,
    pub failures: u64,
    pub early_exits: u64,
    pub excluded: u64,
}

/// Spawns a background task that periodically logs run counters until the
/// token is cancelled.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "runstack::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    tracing::info!(
                        target: "runstack::metrics",
                        units_resolved = snapshot.units_resolved,
                        backend_runs = snapshot.backend_runs,
                        retries = snapshot.retries,
                        failures = snapshot.failures,
                        early_exits = snapshot.early_exits,
                        excluded = snapshot.excluded,
                        "run metrics snapshot"
                    );
                }
            }
        }
    })
}
