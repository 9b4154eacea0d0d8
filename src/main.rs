use std::panic;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use sandrun::config::SandboxConfig;
use sandrun::dispatcher::{AsyncDispatch, Dispatcher};
use sandrun::notify::{ChannelNotifier, Notifier};
use sandrun::queue::{InMemoryQueue, JobQueue};
use sandrun::runner::process::ProcessRunner;
use sandrun::wire::{
    AsyncExecuteRequest, DeliveryMessage, ExecuteRequest, ExecuteResponse, QueuedResponse,
};
use sandrun::worker::spawn_workers;

/// Headless driver: one JSON request per stdin line, one JSON response per
/// stdout line. Sync requests are `ExecuteRequest`; lines carrying a
/// `delivery_handle` are treated as `AsyncExecuteRequest` and their results
/// are pushed later as `execution_result` lines.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let config = Arc::new(SandboxConfig::from_env());
    tracing::info!(
        workers = config.worker_count,
        max_concurrent = config.max_concurrent_executions,
        "starting sandrun"
    );

    let runner = Arc::new(ProcessRunner::new(config.clone())?);
    let queue: Arc<dyn JobQueue> = Arc::new(InMemoryQueue::new(config.queue_capacity));
    let notifier = Arc::new(ChannelNotifier::new());
    let dispatcher = Arc::new(Dispatcher::new(config.clone(), runner, queue.clone()));

    let worker_handles = spawn_workers(
        config.worker_count,
        dispatcher.clone(),
        queue.clone(),
        notifier.clone() as Arc<dyn Notifier>,
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        handle_line(&line, &dispatcher, &notifier).await;
    }

    queue.close();
    futures::future::join_all(worker_handles).await;
    Ok(())
}

async fn handle_line(line: &str, dispatcher: &Arc<Dispatcher>, notifier: &Arc<ChannelNotifier>) {
    // Async requests are distinguished by their delivery handle.
    if let Ok(request) = serde_json::from_str::<AsyncExecuteRequest>(line) {
        let handle = request.delivery_handle.clone();
        let mut rx = notifier.register(&handle);

        match dispatcher.dispatch_async(request.into_submission()).await {
            Ok(AsyncDispatch::Queued { job_id }) => {
                print_json(&QueuedResponse::new(job_id));
                tokio::spawn(async move {
                    if let Some(delivery) = rx.recv().await {
                        print_json(&DeliveryMessage::new(delivery.job_id, &delivery.outcome));
                    }
                });
            }
            Ok(AsyncDispatch::Rejected(outcome)) => {
                notifier.unregister(&handle);
                print_json(&ExecuteResponse::from(&outcome));
            }
            Err(error) => {
                notifier.unregister(&handle);
                tracing::error!(error = %error, "async dispatch failed");
                print_json(&serde_json::json!({ "error": error.to_string() }));
            }
        }
        return;
    }

    match serde_json::from_str::<ExecuteRequest>(line) {
        Ok(request) => match dispatcher.dispatch_sync(request.into_submission()).await {
            Ok(outcome) => print_json(&ExecuteResponse::from(&outcome)),
            Err(error) => {
                tracing::error!(error = %error, "sync dispatch failed");
                print_json(&serde_json::json!({ "error": error.to_string() }));
            }
        },
        Err(error) => {
            print_json(&serde_json::json!({ "error": format!("invalid request: {error}") }));
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(error) => tracing::error!(error = %error, "failed to encode response"),
    }
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
