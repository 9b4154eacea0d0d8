use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;
use crate::domain::{Delivery, Job};
use crate::notify::Notifier;
use crate::queue::JobQueue;

/// Spawns `count` workers over the shared queue. Each worker claims one
/// job at a time, runs the dispatcher's execute path (validation is
/// re-checked; a corrupted queue must not bypass it), and publishes the
/// outcome to the job's delivery handle. Workers exit when the queue
/// closes. Redelivered jobs are executed again: the contract is
/// at-least-once, not exactly-once.
pub fn spawn_workers(
    count: usize,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<dyn JobQueue>,
    notifier: Arc<dyn Notifier>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker_id| {
            let dispatcher = dispatcher.clone();
            let queue = queue.clone();
            let notifier = notifier.clone();
            tokio::spawn(async move {
                tracing::info!(worker_id, "worker started");
                while let Some(job) = queue.pull().await {
                    process_job(worker_id, &dispatcher, notifier.as_ref(), job).await;
                }
                tracing::info!(worker_id, "worker shutting down, queue closed");
            })
        })
        .collect()
}

async fn process_job(
    worker_id: usize,
    dispatcher: &Dispatcher,
    notifier: &dyn Notifier,
    job: Job,
) {
    let job_id = job.id;
    tracing::debug!(worker_id, %job_id, enqueued_at = %job.enqueued_at, "claimed job");

    let outcome = match dispatcher.execute(&job.submission).await {
        Ok(outcome) => outcome,
        Err(error) => {
            // There is no caller left to return this to; deliver a fault
            // outcome so the client still gets its single delivery.
            tracing::error!(worker_id, %job_id, error = %error, "runner infrastructure failure");
            Dispatcher::internal_fault_outcome(&error)
        }
    };

    let Some(handle) = job.submission.delivery_handle.as_deref() else {
        tracing::warn!(worker_id, %job_id, "job has no delivery handle, outcome dropped");
        return;
    };

    match notifier.publish(handle, Delivery { job_id, outcome }).await {
        Ok(()) => tracing::info!(worker_id, %job_id, "outcome delivered"),
        Err(error) => {
            // Best-effort loss, not retried.
            tracing::warn!(worker_id, %job_id, error = %error, "delivery failed, outcome lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SandboxConfig;
    use crate::domain::Submission;
    use crate::notify::ChannelNotifier;
    use crate::queue::InMemoryQueue;
    use crate::runner::stubs::RunnerStub;
    use crate::runner::traits::{RunError, RunReport};

    fn setup(
        runner_result: Result<RunReport, RunError>,
    ) -> (Arc<Dispatcher>, Arc<InMemoryQueue>, Arc<ChannelNotifier>) {
        let config = Arc::new(SandboxConfig::default());
        let queue = Arc::new(InMemoryQueue::new(8));
        let dispatcher = Arc::new(Dispatcher::new(
            config,
            Arc::new(RunnerStub::new(runner_result, Duration::ZERO)),
            queue.clone(),
        ));
        (dispatcher, queue, Arc::new(ChannelNotifier::new()))
    }

    #[tokio::test]
    async fn worker_executes_and_delivers_exactly_once() {
        let report = RunReport::completed("ok\n".to_string(), String::new(), Duration::from_millis(1));
        let (dispatcher, queue, notifier) = setup(Ok(report));
        let mut rx = notifier.register("client-1");

        let handles = spawn_workers(2, dispatcher, queue.clone(), notifier.clone());

        let job = Job::new(
            Submission::new("print(\"ok\")", Duration::from_secs(5))
                .with_delivery_handle("client-1"),
        );
        let job_id = job.id;
        queue.push(job).await.unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery within deadline")
            .expect("channel open");
        assert_eq!(delivery.job_id, job_id);
        assert!(delivery.outcome.success());
        assert_eq!(delivery.outcome.stdout, "ok\n");

        // One delivery per job.
        queue.close();
        futures::future::join_all(handles).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn worker_revalidates_jobs_from_the_queue() {
        let report = RunReport::completed(String::new(), String::new(), Duration::ZERO);
        let (dispatcher, queue, notifier) = setup(Ok(report));
        let mut rx = notifier.register("client-2");
        let handles = spawn_workers(1, dispatcher, queue.clone(), notifier.clone());

        // A job like this can only appear through queue corruption; the
        // worker still rejects it.
        let job = Job::new(
            Submission::new("eval(\"1\")", Duration::from_secs(5))
                .with_delivery_handle("client-2"),
        );
        queue.push(job).await.unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!delivery.outcome.accepted());

        queue.close();
        futures::future::join_all(handles).await;
    }

    #[tokio::test]
    async fn runner_failure_still_produces_a_delivery() {
        let (dispatcher, queue, notifier) = setup(Err(RunError::FailedToLaunch {
            msg: "interpreter missing".to_string(),
        }));
        let mut rx = notifier.register("client-3");
        let handles = spawn_workers(1, dispatcher, queue.clone(), notifier.clone());

        queue
            .push(Job::new(
                Submission::new("print(1)", Duration::from_secs(5))
                    .with_delivery_handle("client-3"),
            ))
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!delivery.outcome.success());
        assert!(delivery.outcome.accepted());

        queue.close();
        futures::future::join_all(handles).await;
    }

    #[tokio::test]
    async fn workers_exit_when_queue_closes() {
        let report = RunReport::completed(String::new(), String::new(), Duration::ZERO);
        let (dispatcher, queue, notifier) = setup(Ok(report));
        let handles = spawn_workers(3, dispatcher, queue.clone(), notifier);

        queue.close();
        let joined = tokio::time::timeout(
            Duration::from_secs(2),
            futures::future::join_all(handles),
        )
        .await
        .expect("workers exit after close");
        assert_eq!(joined.len(), 3);
    }
}
