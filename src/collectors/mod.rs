use std::future::Future;
use std::time::Duration;

use crate::error::CollectError;

pub mod fake;
pub mod linux;
pub mod rocm_smi;

/// Runs one invocation of the telemetry tool.
/// Implementations (RocmSmi, FakeSmi) own the program name; callers only pass
/// arguments and a time budget.
pub trait ToolRunner: Send + Sync + 'static {
    /// Program name, used in logs and error messages.
    fn program(&self) -> &str;

    /// Run the tool with `args` and return its stdout.
    /// Must give up (and clean up the child) once `timeout` elapses.
    fn run(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> impl Future<Output = Result<String, CollectError>> + Send;
}

/// Source of OS-level CPU accounting snapshots (cumulative tick counters).
pub trait CpuStatSource: Send + Sync + 'static {
    fn read(&mut self) -> Result<CpuTimes, CollectError>;
}

/// Cumulative CPU time counters, in clock ticks since boot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

impl CpuTimes {
    /// Busy percentage between `prev` and `self`:
    ///
    /// ```text
    /// usage% = (Δtotal − Δidle) / Δtotal × 100
    /// ```
    ///
    /// Returns 0 when no time elapsed or the counters went backwards.
    pub fn usage_since(&self, prev: &CpuTimes) -> f64 {
        let total_delta = self.total.saturating_sub(prev.total);
        let idle_delta = self.idle.saturating_sub(prev.idle);
        if total_delta == 0 {
            return 0.0;
        }
        let busy = total_delta.saturating_sub(idle_delta) as f64;
        busy / total_delta as f64 * 100.0
    }
}

/// Render a command line for logs and errors, e.g. `rocm-smi --showmeminfo vram`.
pub fn describe_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_since_computes_busy_share() {
        let prev = CpuTimes { total: 1000, idle: 800 };
        let cur = CpuTimes { total: 1200, idle: 950 };
        // 200 ticks elapsed, 150 idle → 25% busy
        assert!((cur.usage_since(&prev) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn usage_since_handles_no_elapsed_time() {
        let snap = CpuTimes { total: 500, idle: 400 };
        assert_eq!(snap.usage_since(&snap), 0.0);
    }

    #[test]
    fn usage_since_handles_counter_reset() {
        let prev = CpuTimes { total: 5000, idle: 4000 };
        let cur = CpuTimes { total: 100, idle: 50 };
        assert_eq!(cur.usage_since(&prev), 0.0);
    }

    #[test]
    fn describe_command_joins_args() {
        assert_eq!(describe_command("rocm-smi", &[]), "rocm-smi");
        assert_eq!(
            describe_command("rocm-smi", &["--showmeminfo", "vram"]),
            "rocm-smi --showmeminfo vram"
        );
    }
}
