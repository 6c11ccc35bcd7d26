use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::{describe_command, ToolRunner};
use crate::error::{CollectError, ToolFailure};

pub const DEFAULT_PROGRAM: &str = "rocm-smi";

/// Runs the real `rocm-smi` binary (or a compatible program) as a child
/// process.
pub struct RocmSmi {
    program: String,
}

impl RocmSmi {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for RocmSmi {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl ToolRunner for RocmSmi {
    fn program(&self) -> &str {
        &self.program
    }

    /// Spawn the tool and collect stdout. The child is killed when the
    /// timeout drops the pending `output()` future.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<String, CollectError> {
        let fail = |failure| CollectError::ToolExecution {
            command: describe_command(&self.program, args),
            failure,
        };

        let mut command = Command::new(&self.program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(fail(ToolFailure::Spawn(e))),
            Err(_) => return Err(fail(ToolFailure::Timeout(timeout))),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(fail(ToolFailure::Exit {
                status: output.status.to_string(),
                stderr,
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
