use std::time::Duration;

use uuid::Uuid;

/// One request to execute a snippet. Created per request, never mutated.
#[derive(Clone, Debug)]
pub struct Submission {
    pub source: String,
    pub timeout: Duration,
    pub delivery_handle: Option<String>,
}

impl Submission {
    pub fn new(source: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source: source.into(),
            timeout,
            delivery_handle: None,
        }
    }

    pub fn with_delivery_handle(mut self, handle: impl Into<String>) -> Self {
        self.delivery_handle = Some(handle.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    SyntaxError,
    DisallowedImport,
    RestrictedCall,
    DisallowedConstruct,
}

/// A single finding of the static validator. Line and column are 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Violation {
    pub kind: ViolationKind,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Violation {
    pub fn new(
        kind: ViolationKind,
        line: usize,
        column: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            line,
            column,
            message: message.into(),
        }
    }
}

/// Coarse category of an uncaught fault inside the sandbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    DivisionByZero,
    Type,
    Value,
    Name,
    Index,
    Key,
    Recursion,
    ResourceExceeded,
    Uncategorized,
}

/// The closed result state of one execution attempt. Exactly one variant
/// holds per attempt; success, fault, timeout and rejection are never
/// combined as independent flags.
#[derive(Clone, Debug, PartialEq)]
pub enum OutcomeStatus {
    Completed,
    Fault { kind: FaultKind, message: String },
    TimedOut,
    Rejected { violations: Vec<Violation> },
}

#[derive(Clone, Debug)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn rejected(violations: Vec<Violation>) -> Self {
        Self {
            status: OutcomeStatus::Rejected { violations },
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// The submission passed validation (it may still have faulted or
    /// timed out).
    pub fn accepted(&self) -> bool {
        !matches!(self.status, OutcomeStatus::Rejected { .. })
    }

    pub fn success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Completed)
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.status, OutcomeStatus::TimedOut)
    }

    pub fn violations(&self) -> &[Violation] {
        match &self.status {
            OutcomeStatus::Rejected { violations } => violations,
            _ => &[],
        }
    }
}

/// A queued unit of accepted work. Owned by the queue until a worker
/// claims it; a queue implementation may redeliver after a worker crash.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: Uuid,
    pub submission: Submission,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
}

impl Job {
    pub fn new(submission: Submission) -> Self {
        Self {
            id: Uuid::new_v4(),
            submission,
            enqueued_at: chrono::Utc::now(),
        }
    }
}

/// The single, best-effort push of an outcome to a delivery handle.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub job_id: Uuid,
    pub outcome: Outcome,
}
