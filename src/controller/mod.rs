//! Periodic collection: owns the sampler, the history and the polling task.

mod poll_loop;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collectors::{CpuStatSource, ToolRunner};
use crate::config::CollectorConfig;
use crate::device_info::query_static_info;
use crate::error::{CollectError, HistoryError};
use crate::history::History;
use crate::model::{HistoryStats, Sample, StaticDeviceInfo};
use crate::sampler::Sampler;

/// Receives every failed collection round.
pub type ErrorSink = Arc<dyn Fn(&CollectError) + Send + Sync>;

/// Default sink: log the failure and move on.
pub fn log_errors() -> ErrorSink {
    Arc::new(|err: &CollectError| warn!(error = %err, "collection round failed"))
}

/// History statistics plus the current collection interval.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollectorStats {
    #[serde(flatten)]
    pub history: HistoryStats,
    pub interval_seconds: f64,
}

impl CollectorStats {
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        let mut map = self.history.to_map();
        map.insert("interval_seconds", self.interval_seconds);
        map
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs a [`Sampler`] on a fixed interval and keeps the results in a
/// bounded [`History`].
pub struct Collector<R, C> {
    sampler: Arc<Mutex<Sampler<R, C>>>,
    runner: Arc<R>,
    history: Arc<History>,
    interval: watch::Sender<Duration>,
    sink: ErrorSink,
    timeout: Duration,
    running: Mutex<Option<Running>>,
}

impl<R: ToolRunner, C: CpuStatSource> Collector<R, C> {
    pub fn new(config: &CollectorConfig, runner: R, cpu: C, sink: ErrorSink) -> Self {
        let config = config.clone().normalized();
        let runner = Arc::new(runner);
        let (interval, _) = watch::channel(config.interval);

        Self {
            sampler: Arc::new(Mutex::new(Sampler::new(
                Arc::clone(&runner),
                cpu,
                config.timeout,
            ))),
            runner,
            history: Arc::new(History::new(config.max_history)),
            interval,
            sink,
            timeout: config.timeout,
            running: Mutex::new(None),
        }
    }

    /// Spawn the polling task. The first round runs immediately.
    /// No-op when already running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("collector already running");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop::run(
            Arc::clone(&self.sampler),
            Arc::clone(&self.history),
            self.interval.subscribe(),
            shutdown_rx,
            Arc::clone(&self.sink),
        ));
        *running = Some(Running { shutdown, handle });
        info!(interval = ?self.interval(), "collector started");
    }

    /// Stop the polling task and wait for it to exit. A round already in
    /// progress is allowed to finish. No-op when stopped.
    pub async fn stop(&self) {
        let Some(Running { shutdown, handle }) = self.running.lock().await.take() else {
            return;
        };
        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            warn!(error = %e, "collection task ended abnormally");
        }
        info!("collector stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub fn interval(&self) -> Duration {
        *self.interval.borrow()
    }

    /// Change the collection interval. Zero or negative values are ignored.
    ///
    /// A running loop restarts its timer right away and collects immediately.
    pub fn set_interval(&self, interval: TimeDelta) {
        let period = match interval.to_std() {
            Ok(period) if !period.is_zero() => period,
            _ => {
                debug!(?interval, "ignoring non-positive interval");
                return;
            }
        };
        let changed = self.interval.send_if_modified(|current| {
            if *current == period {
                return false;
            }
            *current = period;
            true
        });
        if changed {
            info!(interval = ?period, "collection interval updated");
        }
    }

    /// Copy of every stored sample, oldest first.
    pub fn history(&self) -> Vec<Sample> {
        self.history.snapshot()
    }

    pub fn latest(&self) -> Result<Sample, HistoryError> {
        self.history.latest()
    }

    /// Samples captured within `span` of now.
    pub fn window(&self, span: TimeDelta) -> Vec<Sample> {
        self.history.window(span)
    }

    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            history: self.history.stats(),
            interval_seconds: self.interval().as_secs_f64(),
        }
    }

    pub fn clear_history(&self) {
        self.history.clear();
    }

    /// Shared handle to the underlying store.
    pub fn history_store(&self) -> Arc<History> {
        Arc::clone(&self.history)
    }

    /// Query product, serial, firmware etc. Not cached.
    pub async fn static_device_info(&self) -> Vec<StaticDeviceInfo> {
        query_static_info(self.runner.as_ref(), self.timeout).await
    }
}
