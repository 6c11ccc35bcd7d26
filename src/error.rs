//! Error types for collection rounds and history queries.

use std::time::Duration;

/// Why a single `rocm-smi` invocation failed.
#[derive(Debug, thiserror::Error)]
pub enum ToolFailure {
    /// The program could not be started (missing binary, permissions, ...).
    #[error("could not be started: {0}")]
    Spawn(#[source] std::io::Error),

    /// The program ran but exited unsuccessfully.
    #[error("exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    /// The program did not finish within its budget and was killed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Raw tool output could not be turned into a sample.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty tool output")]
    EmptyInput,

    #[error("no device data found in tool output")]
    NoDeviceData,
}

/// A parsed sample carries values outside their physical range.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("sample contains no devices")]
    NoDevices,

    #[error("invalid {field} for GPU {device}: {value:.2} (expected {min}..={max})")]
    DeviceOutOfRange {
        device: u32,
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid host CPU usage: {0:.2}")]
    HostCpuOutOfRange(f64),
}

/// Everything that can go wrong during one collection round.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("`{command}` {failure}")]
    ToolExecution {
        command: String,
        #[source]
        failure: ToolFailure,
    },

    #[error("parsing failed: {0}")]
    Parse(#[from] ParseError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Reading the OS CPU accounting snapshot failed.
    #[error("failed to read CPU stats from {path}: {detail}")]
    CpuStat { path: String, detail: String },
}

/// Query against the history store that has no sensible answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("no data available")]
    NoData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_execution_message_names_the_command() {
        let err = CollectError::ToolExecution {
            command: "rocm-smi -c".into(),
            failure: ToolFailure::Timeout(Duration::from_secs(3)),
        };
        assert_eq!(err.to_string(), "`rocm-smi -c` timed out after 3s");
    }

    #[test]
    fn parse_and_validation_errors_convert() {
        let err: CollectError = ParseError::EmptyInput.into();
        assert!(matches!(err, CollectError::Parse(ParseError::EmptyInput)));

        let err: CollectError = ValidationError::HostCpuOutOfRange(120.0).into();
        assert_eq!(err.to_string(), "validation failed: invalid host CPU usage: 120.00");
    }
}
