use std::time::Duration;

use crate::runner::traits::{RunError, RunReport, Runner};

/// Canned runner for wiring and tests: returns a fixed result after a
/// fixed delay.
#[derive(Clone, Debug)]
pub struct RunnerStub {
    result: Result<RunReport, RunError>,
    delay: Duration,
}

impl RunnerStub {
    pub fn new(result: Result<RunReport, RunError>, delay: Duration) -> Self {
        Self { result, delay }
    }
}

#[async_trait::async_trait]
impl Runner for RunnerStub {
    #[tracing::instrument]
    async fn run(&self, source: &str, limit: Duration) -> Result<RunReport, RunError> {
        tracing::debug!(source_len = source.len(), limit_ms = limit.as_millis() as u64, "stub execution");
        tokio::time::sleep(self.delay).await;
        self.result.clone()
    }
}
