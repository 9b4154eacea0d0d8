use std::time::Duration;

use crate::domain::FaultKind;

/// What one isolated execution produced. User-code failure is data here,
/// never an error of the runner itself.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub stdout: String,
    pub stderr: String,
    pub fault: Option<(FaultKind, String)>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn completed(stdout: String, stderr: String, elapsed: Duration) -> Self {
        Self {
            stdout,
            stderr,
            fault: None,
            timed_out: false,
            elapsed,
        }
    }
}

/// Infrastructure failures only: the submission never started or the
/// runner itself broke. A fault inside the sandbox is a `RunReport`.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to launch execution: {msg}")]
    FailedToLaunch { msg: String },
    #[error("internal runner error: {msg}")]
    Internal { msg: String },
}

/// Isolated executor of validator-accepted source. Implementations must
/// guarantee a fresh execution context per invocation and a hard kill at
/// the timeout; a hung submission can never block the runner.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Runner: std::fmt::Debug + Send + Sync {
    async fn run(&self, source: &str, timeout: Duration) -> Result<RunReport, RunError>;
}
