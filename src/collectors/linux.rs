use std::fs;
use std::path::PathBuf;

use super::{CpuStatSource, CpuTimes};
use crate::error::CollectError;

const PROC_STAT: &str = "/proc/stat";

/// Reads aggregate CPU time counters from `/proc/stat`.
pub struct ProcStat {
    path: PathBuf,
}

impl ProcStat {
    pub fn new() -> Self {
        Self::with_path(PROC_STAT)
    }

    /// Read from another file with `/proc/stat` layout (tests, chroots).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcStat {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuStatSource for ProcStat {
    fn read(&mut self) -> Result<CpuTimes, CollectError> {
        let fail = |detail: String| CollectError::CpuStat {
            path: self.path.display().to_string(),
            detail,
        };
        // Blocking read: fine for procfs, which is served from memory. Point
        // `with_path` only at local files.
        let content = fs::read_to_string(&self.path).map_err(|e| fail(e.to_string()))?;
        parse_cpu_line(&content).map_err(fail)
    }
}

/// Parse the aggregate `cpu` line of `/proc/stat`.
///
/// Fields (after the `cpu` label):
///  0  user
///  1  nice
///  2  system
///  3  idle
///  4  iowait
///  …  irq softirq steal guest guest_nice
///
/// `total` is the sum of every field, `idle` is field 3.
pub fn parse_cpu_line(content: &str) -> Result<CpuTimes, String> {
    let line = content
        .lines()
        .next()
        .ok_or_else(|| "empty file".to_string())?;
    let Some(rest) = line.strip_prefix("cpu ") else {
        return Err(format!("unexpected first line: {line}"));
    };

    let values: Vec<u64> = rest
        .split_whitespace()
        .enumerate()
        .map(|(i, field)| {
            field
                .parse::<u64>()
                .map_err(|e| format!("field {}: {}", i + 1, e))
        })
        .collect::<Result<_, _>>()?;

    if values.len() < 4 {
        return Err(format!("expected at least 4 fields, got {}", values.len()));
    }

    Ok(CpuTimes {
        total: values.iter().sum(),
        idle: values[3],
    })
}
