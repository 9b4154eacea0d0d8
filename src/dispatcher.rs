use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::domain::{FaultKind, Job, Outcome, OutcomeStatus, Submission};
use crate::queue::{JobQueue, QueueError};
use crate::runner::traits::{RunError, Runner};
use crate::validator::Validator;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("source exceeds the {limit}-byte ceiling")]
    SourceTooLarge { limit: usize },
    #[error("failed to enqueue job: {0}")]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Execution(#[from] RunError),
}

/// Immediate answer on the async path: either the job was queued, or the
/// validator rejected the submission and the caller learns so without
/// waiting on the queue.
#[derive(Debug)]
pub enum AsyncDispatch {
    Queued { job_id: Uuid },
    Rejected(Outcome),
}

/// Chooses the synchronous or queued execution path. Stateless apart from
/// injected collaborators; safe to share across request handlers.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    config: Arc<SandboxConfig>,
    validator: Validator,
    runner: Arc<dyn Runner>,
    queue: Arc<dyn JobQueue>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<SandboxConfig>,
        runner: Arc<dyn Runner>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_executions));
        Self {
            validator: Validator::new(config.clone()),
            config,
            runner,
            queue,
            permits,
        }
    }

    /// Blocking path: the caller owns the wait, bounded by the timeout
    /// ceiling. Rejections never reach the runner.
    #[tracing::instrument(skip(self, submission), fields(source_len = submission.source.len()))]
    pub async fn dispatch_sync(&self, submission: Submission) -> Result<Outcome, DispatchError> {
        self.check_size(&submission)?;
        let outcome = self.execute(&submission).await?;
        Ok(outcome)
    }

    /// Queued path: validation stays synchronous so rejects are instant,
    /// accepted work returns a job id without waiting for execution.
    #[tracing::instrument(skip(self, submission), fields(source_len = submission.source.len()))]
    pub async fn dispatch_async(
        &self,
        submission: Submission,
    ) -> Result<AsyncDispatch, DispatchError> {
        self.check_size(&submission)?;

        if let Err(violations) = self.validator.validate(&submission.source) {
            tracing::debug!(count = violations.len(), "submission rejected before enqueue");
            return Ok(AsyncDispatch::Rejected(Outcome::rejected(violations)));
        }

        let job = Job::new(submission);
        let job_id = job.id;
        self.queue.push(job).await?;
        tracing::info!(%job_id, "job enqueued");
        Ok(AsyncDispatch::Queued { job_id })
    }

    /// Shared validate → acquire permit → run path for the sync branch and
    /// the workers. The permit guard releases the concurrency slot on every
    /// exit path.
    pub(crate) async fn execute(&self, submission: &Submission) -> Result<Outcome, RunError> {
        if let Err(violations) = self.validator.validate(&submission.source) {
            return Ok(Outcome::rejected(violations));
        }

        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RunError::Internal {
                msg: "execution semaphore closed".to_string(),
            })?;

        let limit = self.config.clamp_timeout(submission.timeout);
        let report = self.runner.run(&submission.source, limit).await?;

        let status = if report.timed_out {
            OutcomeStatus::TimedOut
        } else if let Some((kind, message)) = report.fault {
            OutcomeStatus::Fault { kind, message }
        } else {
            OutcomeStatus::Completed
        };

        Ok(Outcome {
            status,
            stdout: report.stdout,
            stderr: report.stderr,
            elapsed: report.elapsed,
        })
    }

    /// Workers deliver a fault outcome instead of silence when the runner
    /// itself fails; the sync path surfaces the same failure as an error.
    pub(crate) fn internal_fault_outcome(error: &RunError) -> Outcome {
        Outcome {
            status: OutcomeStatus::Fault {
                kind: FaultKind::Uncategorized,
                message: format!("internal execution error: {error}"),
            },
            stdout: String::new(),
            stderr: String::new(),
            elapsed: std::time::Duration::ZERO,
        }
    }

    fn check_size(&self, submission: &Submission) -> Result<(), DispatchError> {
        if submission.source.len() > self.config.max_source_bytes {
            return Err(DispatchError::SourceTooLarge {
                limit: self.config.max_source_bytes,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::ViolationKind;
    use crate::queue::InMemoryQueue;
    use crate::runner::stubs::RunnerStub;
    use crate::runner::traits::{MockRunner, RunReport};

    fn config() -> Arc<SandboxConfig> {
        Arc::new(SandboxConfig::default())
    }

    fn dispatcher_with_runner(runner: Arc<dyn Runner>) -> Dispatcher {
        Dispatcher::new(config(), runner, Arc::new(InMemoryQueue::new(8)))
    }

    fn hello_report() -> RunReport {
        RunReport::completed("hi\n".to_string(), String::new(), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn sync_path_returns_runner_outcome() {
        let runner = Arc::new(RunnerStub::new(Ok(hello_report()), Duration::ZERO));
        let dispatcher = dispatcher_with_runner(runner);

        let outcome = dispatcher
            .dispatch_sync(Submission::new("print(\"hi\")", Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.stdout, "hi\n");
    }

    #[tokio::test]
    async fn rejected_submission_never_reaches_the_runner() {
        let mut runner = MockRunner::new();
        runner.expect_run().times(0);
        let dispatcher = dispatcher_with_runner(Arc::new(runner));

        let outcome = dispatcher
            .dispatch_sync(Submission::new(
                "import os\nos.system(\"ls\")",
                Duration::from_secs(5),
            ))
            .await
            .unwrap();

        assert!(!outcome.accepted());
        assert!(
            outcome
                .violations()
                .iter()
                .any(|v| v.kind == ViolationKind::DisallowedImport)
        );
    }

    #[tokio::test]
    async fn oversized_source_is_rejected_before_parsing() {
        let mut runner = MockRunner::new();
        runner.expect_run().times(0);
        let dispatcher = dispatcher_with_runner(Arc::new(runner));

        let big = "a".repeat(SandboxConfig::default().max_source_bytes + 1);
        let err = dispatcher
            .dispatch_sync(Submission::new(big, Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::SourceTooLarge { .. }));
    }

    #[tokio::test]
    async fn async_path_enqueues_accepted_work() {
        let runner = Arc::new(RunnerStub::new(Ok(hello_report()), Duration::ZERO));
        let queue = Arc::new(InMemoryQueue::new(8));
        let dispatcher = Dispatcher::new(config(), runner, queue.clone());

        let dispatch = dispatcher
            .dispatch_async(
                Submission::new("print(1)", Duration::from_secs(5))
                    .with_delivery_handle("client-1"),
            )
            .await
            .unwrap();

        let job_id = match dispatch {
            AsyncDispatch::Queued { job_id } => job_id,
            other => panic!("expected Queued, got {other:?}"),
        };
        let job = queue.pull().await.unwrap();
        assert_eq!(job.id, job_id);
    }

    #[tokio::test]
    async fn async_path_rejects_without_enqueuing() {
        let runner = Arc::new(RunnerStub::new(Ok(hello_report()), Duration::ZERO));
        let queue = Arc::new(InMemoryQueue::new(8));
        let dispatcher = Dispatcher::new(config(), runner, queue.clone());

        let dispatch = dispatcher
            .dispatch_async(Submission::new("eval(\"1\")", Duration::from_secs(5)))
            .await
            .unwrap();

        let outcome = match dispatch {
            AsyncDispatch::Rejected(outcome) => outcome,
            other => panic!("expected Rejected, got {other:?}"),
        };
        assert!(!outcome.accepted());

        queue.close();
        assert!(queue.pull().await.is_none(), "nothing may be enqueued");
    }

    #[tokio::test]
    async fn full_queue_surfaces_as_dispatch_error() {
        let runner = Arc::new(RunnerStub::new(Ok(hello_report()), Duration::ZERO));
        let queue = Arc::new(InMemoryQueue::new(1));
        let dispatcher = Dispatcher::new(config(), runner, queue);

        let first = dispatcher
            .dispatch_async(Submission::new("print(1)", Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(matches!(first, AsyncDispatch::Queued { .. }));

        let err = dispatcher
            .dispatch_async(Submission::new("print(1)", Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Queue(QueueError::Full)));
    }

    #[tokio::test]
    async fn timeout_is_clamped_to_configured_maximum() {
        let mut runner = MockRunner::new();
        let max = SandboxConfig::default().max_timeout;
        runner
            .expect_run()
            .withf(move |_, limit| *limit == max)
            .times(1)
            .returning(|_, _| Ok(RunReport::completed(String::new(), String::new(), Duration::ZERO)));
        let dispatcher = dispatcher_with_runner(Arc::new(runner));

        dispatcher
            .dispatch_sync(Submission::new("print(1)", Duration::from_secs(9999)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrency_ceiling_bounds_parallel_executions() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Debug)]
        struct GaugeRunner {
            current: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl Runner for GaugeRunner {
            async fn run(
                &self,
                _source: &str,
                _limit: Duration,
            ) -> Result<RunReport, RunError> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(RunReport::completed(String::new(), String::new(), Duration::ZERO))
            }
        }

        let mut config = SandboxConfig::default();
        config.max_concurrent_executions = 2;
        let runner = Arc::new(GaugeRunner {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(config),
            runner.clone(),
            Arc::new(InMemoryQueue::new(8)),
        ));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .dispatch_sync(Submission::new("print(1)", Duration::from_secs(5)))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().success());
        }

        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }
}
