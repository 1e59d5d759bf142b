use async_trait::async_trait;

use crate::error::Result;
use crate::task::{CronResponse, CronStat, CronTask};

/// Persists cron run outcomes so operators can audit schedules and spot
/// failing or starving tasks.
///
/// Hooks fire in a fixed order for every run: `record_task`,
/// `record_run_start`, then after the task body `record_run_end` and
/// `record_stats`.
#[async_trait]
pub trait CronStorage: Send + Sync {
    /// Upsert the task's registration record.
    async fn record_task(&self, task: &dyn CronTask) -> Result<()>;

    /// Mark a run as started.
    async fn record_run_start(&self, task: &dyn CronTask) -> Result<()>;

    /// Attach the outcome to the started run.
    async fn record_run_end(&self, response: &CronResponse) -> Result<()>;

    /// Record backlog metrics computed after the run.
    async fn record_stats(&self, stats: &[CronStat]) -> Result<()>;
}

/// No-op storage used in test runs.
#[derive(Default)]
pub struct TestStorage;

impl TestStorage {
    pub fn new() -> Self {
        TestStorage
    }
}

#[async_trait]
impl CronStorage for TestStorage {
    async fn record_task(&self, _task: &dyn CronTask) -> Result<()> {
        Ok(())
    }

    async fn record_run_start(&self, _task: &dyn CronTask) -> Result<()> {
        Ok(())
    }

    async fn record_run_end(&self, _response: &CronResponse) -> Result<()> {
        Ok(())
    }

    async fn record_stats(&self, _stats: &[CronStat]) -> Result<()> {
        Ok(())
    }
}
