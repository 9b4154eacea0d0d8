use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{FaultKind, Outcome, OutcomeStatus, Submission, Violation};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub timeout_seconds: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AsyncExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub timeout_seconds: u64,
    pub delivery_handle: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct WireViolation {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub security_violations: Vec<WireViolation>,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueuedResponse {
    pub job_id: Uuid,
    pub status: &'static str,
}

impl QueuedResponse {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: "queued",
        }
    }
}

/// Push payload for the notification channel: field-for-field the sync
/// response shape plus the job id correlator, so clients handle both paths
/// with one decoder.
#[derive(Clone, Debug, Serialize)]
pub struct DeliveryMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub job_id: Uuid,
    #[serde(flatten)]
    pub response: ExecuteResponse,
}

impl DeliveryMessage {
    pub fn new(job_id: Uuid, outcome: &Outcome) -> Self {
        Self {
            kind: "execution_result",
            job_id,
            response: ExecuteResponse::from(outcome),
        }
    }
}

impl ExecuteRequest {
    pub fn into_submission(self) -> Submission {
        Submission::new(self.code, Duration::from_secs(self.timeout_seconds))
    }
}

impl AsyncExecuteRequest {
    pub fn into_submission(self) -> Submission {
        Submission::new(self.code, Duration::from_secs(self.timeout_seconds))
            .with_delivery_handle(self.delivery_handle)
    }
}

impl From<&Outcome> for ExecuteResponse {
    fn from(outcome: &Outcome) -> Self {
        let (error, error_type) = match &outcome.status {
            OutcomeStatus::Completed => (None, None),
            OutcomeStatus::Fault { kind, message } => {
                (Some(message.clone()), Some(fault_type_name(*kind).to_string()))
            }
            OutcomeStatus::TimedOut => (
                Some("execution timed out".to_string()),
                Some("Timeout".to_string()),
            ),
            OutcomeStatus::Rejected { .. } => (
                Some("submission rejected by security validation".to_string()),
                Some("SecurityViolation".to_string()),
            ),
        };

        Self {
            success: outcome.success(),
            stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
            error,
            error_type,
            execution_time_ms: outcome.elapsed.as_millis() as u64,
            timed_out: outcome.timed_out(),
            security_violations: outcome.violations().iter().map(WireViolation::from).collect(),
        }
    }
}

impl From<&Violation> for WireViolation {
    fn from(violation: &Violation) -> Self {
        Self {
            line: violation.line,
            column: violation.column,
            message: violation.message.clone(),
        }
    }
}

fn fault_type_name(kind: FaultKind) -> &'static str {
    match kind {
        FaultKind::DivisionByZero => "ZeroDivisionError",
        FaultKind::Type => "TypeError",
        FaultKind::Value => "ValueError",
        FaultKind::Name => "NameError",
        FaultKind::Index => "IndexError",
        FaultKind::Key => "KeyError",
        FaultKind::Recursion => "RecursionError",
        FaultKind::ResourceExceeded => "ResourceExceeded",
        FaultKind::Uncategorized => "RuntimeError",
    }
}
