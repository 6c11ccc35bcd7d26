//! One collection round: run `rocm-smi`, parse, enrich, validate.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::debug;

use crate::collectors::{describe_command, CpuStatSource, CpuTimes, ToolRunner};
use crate::error::CollectError;
use crate::model::Sample;
use crate::parser::Parser;

/// Extra invocations whose output is appended to the primary table:
/// detailed VRAM byte counts and current clock levels.
pub const SUPPLEMENTARY_QUERIES: &[&[&str]] = &[&["--showmeminfo", "vram"], &["-c"]];

pub struct Sampler<R, C> {
    runner: Arc<R>,
    cpu: C,
    parser: Parser,
    timeout: Duration,
    /// CPU counters from the previous round, for the usage delta.
    prev_cpu: Option<CpuTimes>,
}

impl<R: ToolRunner, C: CpuStatSource> Sampler<R, C> {
    pub fn new(runner: Arc<R>, cpu: C, timeout: Duration) -> Self {
        Self {
            runner,
            cpu,
            parser: Parser::new(),
            timeout,
            prev_cpu: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a CPU snapshot without collecting, so the next round reports
    /// a real usage figure instead of the first-round 0%.
    pub fn prime_cpu(&mut self) {
        if let Ok(current) = self.cpu.read() {
            self.prev_cpu = Some(current);
        }
    }

    /// Run one collection round.
    ///
    /// The primary invocation must succeed. Supplementary invocations share
    /// what is left of the same time budget and are skipped on failure.
    pub async fn collect(&mut self) -> Result<Sample, CollectError> {
        let started = Utc::now();
        let deadline = Instant::now() + self.timeout;

        let mut combined = self.runner.run(&[], self.timeout).await?;

        for args in SUPPLEMENTARY_QUERIES {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(
                    command = %describe_command(self.runner.program(), args),
                    "time budget exhausted; skipping"
                );
                continue;
            }
            match self.runner.run(args, remaining).await {
                Ok(output) => {
                    combined.push('\n');
                    combined.push_str(&output);
                }
                Err(e) => debug!(error = %e, "supplementary query failed; continuing without it"),
            }
        }

        let mut sample = self.parser.parse_at(&combined, started)?;
        sample.host_cpu_usage = self.host_cpu_usage();
        sample.validate()?;
        Ok(sample)
    }

    /// Usage since the previous snapshot; 0 on the first call or when the
    /// snapshot cannot be read.
    fn host_cpu_usage(&mut self) -> f64 {
        match self.cpu.read() {
            Ok(current) => {
                let usage = self
                    .prev_cpu
                    .map(|prev| current.usage_since(&prev))
                    .unwrap_or(0.0);
                self.prev_cpu = Some(current);
                usage
            }
            Err(e) => {
                debug!(error = %e, "host CPU snapshot unavailable");
                0.0
            }
        }
    }
}
