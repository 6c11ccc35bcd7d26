use std::time::Duration;

use chrono::TimeDelta;

use crate::collectors::rocm_smi::DEFAULT_PROGRAM;
use crate::history::DEFAULT_CAPACITY;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Settings for the collection loop.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectorConfig {
    pub interval: Duration,
    pub max_history: usize,
    /// Budget for one round of `rocm-smi` invocations.
    pub timeout: Duration,
    pub tool: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_history: DEFAULT_CAPACITY,
            timeout: DEFAULT_TIMEOUT,
            tool: DEFAULT_PROGRAM.to_string(),
        }
    }
}

impl CollectorConfig {
    /// Replace zero/empty settings with their defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.interval.is_zero() {
            self.interval = defaults.interval;
        }
        if self.max_history == 0 {
            self.max_history = defaults.max_history;
        }
        if self.timeout.is_zero() {
            self.timeout = defaults.timeout;
        }
        if self.tool.trim().is_empty() {
            self.tool = defaults.tool;
        }
        self
    }
}

/// Parse an interval such as `5`, `500ms`, `2.5s`, `1m`, `1h` or `-1s`.
///
/// A bare integer means seconds. Negative values parse successfully; it is up
/// to the caller to ignore them.
pub fn parse_interval(input: &str) -> Result<TimeDelta, String> {
    let s = input.trim().to_lowercase();
    if s.is_empty() {
        return Err("empty interval".to_string());
    }

    if let Ok(secs) = s.parse::<i64>() {
        return TimeDelta::try_seconds(secs).ok_or_else(|| format!("interval out of range: {input}"));
    }

    // `ms` must be tried before `m` and `s`.
    let (number, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000.0)
    } else {
        return Err(format!("invalid interval '{input}': expected e.g. 5, 500ms, 5s, 1m, 1h"));
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid interval '{input}'"))?;
    let millis = value * unit_ms;
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return Err(format!("interval out of range: {input}"));
    }
    TimeDelta::try_milliseconds(millis.round() as i64)
        .ok_or_else(|| format!("interval out of range: {input}"))
}

/// `clap` value parser: like [`parse_interval`] but only accepts positive
/// durations.
pub fn parse_positive_duration(input: &str) -> Result<Duration, String> {
    let delta = parse_interval(input)?;
    match delta.to_std() {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(format!("'{input}' must be a positive duration")),
    }
}
