use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{describe_command, CpuStatSource, CpuTimes, ToolRunner};
use crate::error::{CollectError, ToolFailure};

/// Scripted stand-in for `rocm-smi`, used in tests to feed canned output.
///
/// Responses are keyed by the space-joined argument list (`""` for the bare
/// invocation). Unscripted invocations fail with a non-zero exit.
#[derive(Default)]
pub struct FakeSmi {
    responses: Mutex<HashMap<String, Result<String, String>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: AtomicUsize,
}

impl FakeSmi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful answer for `args`.
    pub fn respond(&self, args: &str, stdout: impl Into<String>) -> &Self {
        self.script(args, Ok(stdout.into()))
    }

    /// Script a failure (reported as a non-zero exit with `stderr`).
    pub fn fail(&self, args: &str, stderr: impl Into<String>) -> &Self {
        self.script(args, Err(stderr.into()))
    }

    /// Make invocations with `args` take `delay` (on the tokio clock) before
    /// answering.
    pub fn delay(&self, args: &str, delay: Duration) -> &Self {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(args.to_string(), delay);
        self
    }

    /// Number of invocations so far, across all argument lists.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn script(&self, args: &str, response: Result<String, String>) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(args.to_string(), response);
        self
    }
}

impl ToolRunner for FakeSmi {
    fn program(&self) -> &str {
        "rocm-smi"
    }

    async fn run(&self, args: &[&str], _timeout: Duration) -> Result<String, CollectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = args.join(" ");
        let delay = self
            .delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();

        match response {
            Some(Ok(stdout)) => Ok(stdout),
            Some(Err(stderr)) => Err(CollectError::ToolExecution {
                command: describe_command(self.program(), args),
                failure: ToolFailure::Exit {
                    status: "exit status: 1".to_string(),
                    stderr,
                },
            }),
            None => Err(CollectError::ToolExecution {
                command: describe_command(self.program(), args),
                failure: ToolFailure::Exit {
                    status: "exit status: 2".to_string(),
                    stderr: "unscripted invocation".to_string(),
                },
            }),
        }
    }
}

/// CPU snapshot source that replays a fixed sequence, then repeats the last
/// entry forever.
pub struct FixedCpu {
    snapshots: VecDeque<CpuTimes>,
    last: Option<CpuTimes>,
}

impl FixedCpu {
    pub fn new(snapshots: impl IntoIterator<Item = CpuTimes>) -> Self {
        Self {
            snapshots: snapshots.into_iter().collect(),
            last: None,
        }
    }

    /// A machine whose counters never move: usage is always 0.
    pub fn idle() -> Self {
        Self::new([CpuTimes { total: 1000, idle: 1000 }])
    }
}

impl CpuStatSource for FixedCpu {
    fn read(&mut self) -> Result<CpuTimes, CollectError> {
        if let Some(next) = self.snapshots.pop_front() {
            self.last = Some(next);
        }
        self.last.ok_or_else(|| CollectError::CpuStat {
            path: "fake".to_string(),
            detail: "no snapshots scripted".to_string(),
        })
    }
}
