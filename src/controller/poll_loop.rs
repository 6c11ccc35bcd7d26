use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::ErrorSink;
use crate::collectors::{CpuStatSource, ToolRunner};
use crate::history::History;
use crate::sampler::Sampler;

/// Body of the polling task. Exits when shutdown is signalled or either
/// sender is dropped.
pub(super) async fn run<R: ToolRunner, C: CpuStatSource>(
    sampler: Arc<Mutex<Sampler<R, C>>>,
    history: Arc<History>,
    mut interval_rx: watch::Receiver<Duration>,
    mut shutdown_rx: watch::Receiver<bool>,
    sink: ErrorSink,
) {
    let mut ticker = new_ticker(*interval_rx.borrow_and_update());

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let period = *interval_rx.borrow_and_update();
                info!(interval = ?period, "restarting collection timer");
                ticker = new_ticker(period);
                continue;
            }
            _ = ticker.tick() => {}
        }

        collect_once(&sampler, &history, &sink).await;
    }

    debug!("collection loop exited");
}

async fn collect_once<R: ToolRunner, C: CpuStatSource>(
    sampler: &Mutex<Sampler<R, C>>,
    history: &History,
    sink: &ErrorSink,
) {
    let result = sampler.lock().await.collect().await;
    match result {
        Ok(sample) => {
            debug!(
                devices = sample.devices.len(),
                partial = sample.partial,
                host_cpu = sample.host_cpu_usage,
                "sample collected"
            );
            history.append(sample);
        }
        Err(e) => sink(&e),
    }
}

/// First tick fires immediately. Ticks missed during a slow round are
/// delayed rather than fired in a burst.
fn new_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
