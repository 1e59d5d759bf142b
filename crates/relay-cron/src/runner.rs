use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, error};

use relay_core::RuntimeEnv;

use crate::error::{CronError, Result};
use crate::source::DataSource;
use crate::storage::{CronStorage, TestStorage};
use crate::task::{CronContext, CronResponse, CronTask, QueryFilter};

/// Drives one cron run through its lifecycle.
///
/// Hooks fire in a fixed order: record_task, record_run_start, the task
/// body, record_run_end, then stats are computed and recorded. In prod
/// a failing or timed-out body is classified into the run record so the
/// schedule keeps running; everywhere else the error propagates
/// immediately, which also skips the remaining recording hooks.
pub struct CronRunner {
    storage: Arc<dyn CronStorage>,
    env: RuntimeEnv,
}

impl CronRunner {
    pub fn new(storage: Arc<dyn CronStorage>, env: RuntimeEnv) -> Self {
        CronRunner { storage, env }
    }

    pub async fn run(&self, task: &dyn CronTask, ctx: &CronContext) -> Result<CronResponse> {
        debug!(task = task.name(), args = ?task.args(), "Running cron task");

        self.storage.record_task(task).await?;
        self.storage.record_run_start(task).await?;

        let response = self.guarded_process(task, ctx).await?;
        self.storage.record_run_end(&response).await?;

        let stats = task.stats(ctx).await?;
        self.storage.record_stats(&stats).await?;

        Ok(response)
    }

    /// Run the task in a test case against a no-op storage, with the
    /// filter narrowing every queryset the task builds.
    pub async fn test_process(
        task: &dyn CronTask,
        source: Arc<dyn DataSource>,
        filter: QueryFilter,
    ) -> Result<CronResponse> {
        let runner = CronRunner::new(Arc::new(TestStorage::new()), RuntimeEnv::Test);
        let ctx = CronContext::new(source).with_filter(filter);
        runner.run(task, &ctx).await
    }

    async fn guarded_process(
        &self,
        task: &dyn CronTask,
        ctx: &CronContext,
    ) -> Result<CronResponse> {
        match timeout(task.time_limit(), task.process(ctx)).await {
            Ok(Ok(result)) => Ok(CronResponse::success(result)),
            Ok(Err(err)) => {
                if !self.env.is_prod() {
                    return Err(err);
                }
                error!(task = task.name(), "Cron task failed: {err}");
                Ok(CronResponse::error(err.class(), err.to_string()))
            }
            Err(_) => {
                let message = format!("'{}' exceeded its time limit", task.name());
                if !self.env.is_prod() {
                    return Err(CronError::Process(message));
                }
                error!(task = task.name(), "Cron task timed out");
                Ok(CronResponse::aborted(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FindQuery, MemorySource};
    use crate::task::{CronArgs, CronSchedule, CronStat, CronStatus};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Map};
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Storage double that records hook invocations in order.
    #[derive(Default)]
    struct RecordingStorage {
        hooks: Mutex<Vec<String>>,
        last_response: Mutex<Option<CronResponse>>,
        last_stats: Mutex<Vec<CronStat>>,
    }

    impl RecordingStorage {
        fn hooks(&self) -> Vec<String> {
            self.hooks.lock().clone()
        }
    }

    #[async_trait]
    impl CronStorage for RecordingStorage {
        async fn record_task(&self, _task: &dyn CronTask) -> Result<()> {
            self.hooks.lock().push("task".to_string());
            Ok(())
        }

        async fn record_run_start(&self, _task: &dyn CronTask) -> Result<()> {
            self.hooks.lock().push("start".to_string());
            Ok(())
        }

        async fn record_run_end(&self, response: &CronResponse) -> Result<()> {
            self.hooks.lock().push("end".to_string());
            *self.last_response.lock() = Some(response.clone());
            Ok(())
        }

        async fn record_stats(&self, stats: &[CronStat]) -> Result<()> {
            self.hooks.lock().push("stats".to_string());
            *self.last_stats.lock() = stats.to_vec();
            Ok(())
        }
    }

    /// Marks pending documents done, honoring the context filter.
    struct MarkDoneTask {
        args: CronArgs,
    }

    impl MarkDoneTask {
        fn new() -> Self {
            MarkDoneTask {
                args: CronArgs::default(),
            }
        }
    }

    #[async_trait]
    impl CronTask for MarkDoneTask {
        fn name(&self) -> &str {
            "cards.MarkDone"
        }

        fn schedule(&self) -> CronSchedule {
            CronSchedule::daily("0", "4")
        }

        fn args(&self) -> &CronArgs {
            &self.args
        }

        async fn process(&self, ctx: &CronContext) -> Result<BTreeMap<String, i64>> {
            let mut filter = Map::new();
            filter.insert("status".to_string(), json!("pending"));
            let query = ctx.apply_filter(FindQuery::filtered(filter));

            let docs = ctx.source().find_many("cards", &query).await?;
            let processed = docs.len() as i64;
            for mut doc in docs {
                doc.insert("status".to_string(), json!("done"));
                ctx.source().save("cards", doc).await?;
            }

            let mut result = BTreeMap::new();
            result.insert("processed".to_string(), processed);
            Ok(result)
        }

        async fn stats(&self, ctx: &CronContext) -> Result<Vec<CronStat>> {
            let mut filter = Map::new();
            filter.insert("status".to_string(), json!("pending"));
            let query = ctx.apply_filter(FindQuery::filtered(filter));
            let pending = ctx.source().find_many("cards", &query).await?.len();
            Ok(vec![CronStat::new("pending", pending as i64)])
        }
    }

    struct FailingTask {
        args: CronArgs,
    }

    #[async_trait]
    impl CronTask for FailingTask {
        fn name(&self) -> &str {
            "cards.Failing"
        }

        fn schedule(&self) -> CronSchedule {
            CronSchedule::daily("0", "4")
        }

        fn args(&self) -> &CronArgs {
            &self.args
        }

        async fn process(&self, _ctx: &CronContext) -> Result<BTreeMap<String, i64>> {
            Err(CronError::Process("queryset exploded".to_string()))
        }

        async fn stats(&self, _ctx: &CronContext) -> Result<Vec<CronStat>> {
            Ok(Vec::new())
        }
    }

    struct SlowTask {
        args: CronArgs,
    }

    #[async_trait]
    impl CronTask for SlowTask {
        fn name(&self) -> &str {
            "cards.Slow"
        }

        fn schedule(&self) -> CronSchedule {
            CronSchedule::daily("0", "4")
        }

        fn time_limit(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn args(&self) -> &CronArgs {
            &self.args
        }

        async fn process(&self, _ctx: &CronContext) -> Result<BTreeMap<String, i64>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(BTreeMap::new())
        }

        async fn stats(&self, _ctx: &CronContext) -> Result<Vec<CronStat>> {
            Ok(Vec::new())
        }
    }

    async fn seeded_source() -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new());
        for (id, country) in [("a", "US"), ("b", "US"), ("c", "FR")] {
            let mut doc = Map::new();
            doc.insert("id".to_string(), json!(id));
            doc.insert("status".to_string(), json!("pending"));
            doc.insert("country".to_string(), json!(country));
            source.save("cards", doc).await.unwrap();
        }
        source
    }

    #[tokio::test]
    async fn test_hooks_fire_in_order_on_success() {
        let storage = Arc::new(RecordingStorage::default());
        let runner = CronRunner::new(Arc::clone(&storage) as Arc<dyn CronStorage>, RuntimeEnv::Prod);
        let ctx = CronContext::new(seeded_source().await);

        let response = runner.run(&MarkDoneTask::new(), &ctx).await.unwrap();

        assert_eq!(response.status, CronStatus::Success);
        assert_eq!(response.result.unwrap()["processed"], 3);
        assert_eq!(storage.hooks(), vec!["task", "start", "end", "stats"]);
        assert_eq!(
            storage.last_stats.lock().clone(),
            vec![CronStat::new("pending", 0)]
        );
    }

    #[tokio::test]
    async fn test_prod_classifies_process_errors() {
        let storage = Arc::new(RecordingStorage::default());
        let runner = CronRunner::new(Arc::clone(&storage) as Arc<dyn CronStorage>, RuntimeEnv::Prod);
        let ctx = CronContext::new(Arc::new(MemorySource::new()));

        let response = runner
            .run(
                &FailingTask {
                    args: CronArgs::default(),
                },
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(response.status, CronStatus::Error);
        let error = response.error.unwrap();
        assert_eq!(error.class, "Process");
        assert!(error.message.contains("queryset exploded"));

        // The run record still closed with the classified outcome.
        assert_eq!(storage.hooks(), vec!["task", "start", "end", "stats"]);
        assert_eq!(
            storage.last_response.lock().as_ref().unwrap().status,
            CronStatus::Error
        );
    }

    #[tokio::test]
    async fn test_non_prod_propagates_process_errors() {
        let storage = Arc::new(RecordingStorage::default());
        let runner = CronRunner::new(Arc::clone(&storage) as Arc<dyn CronStorage>, RuntimeEnv::Test);
        let ctx = CronContext::new(Arc::new(MemorySource::new()));

        let err = runner
            .run(
                &FailingTask {
                    args: CronArgs::default(),
                },
                &ctx,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CronError::Process(_)));
        // Recording stopped at the failure point.
        assert_eq!(storage.hooks(), vec!["task", "start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prod_timeout_becomes_aborted() {
        let storage = Arc::new(RecordingStorage::default());
        let runner = CronRunner::new(Arc::clone(&storage) as Arc<dyn CronStorage>, RuntimeEnv::Prod);
        let ctx = CronContext::new(Arc::new(MemorySource::new()));

        let response = runner
            .run(
                &SlowTask {
                    args: CronArgs::default(),
                },
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(response.status, CronStatus::Aborted);
        assert_eq!(response.error.unwrap().class, "Timeout");
        assert_eq!(storage.hooks(), vec!["task", "start", "end", "stats"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_prod_timeout_propagates() {
        let runner = CronRunner::new(Arc::new(RecordingStorage::default()), RuntimeEnv::Dev);
        let ctx = CronContext::new(Arc::new(MemorySource::new()));

        let err = runner
            .run(
                &SlowTask {
                    args: CronArgs::default(),
                },
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CronError::Process(_)));
    }

    #[tokio::test]
    async fn test_test_process_applies_sample_filter() {
        let source = seeded_source().await;

        let mut filter = Map::new();
        filter.insert("country".to_string(), json!("US"));
        let response = CronRunner::test_process(
            &MarkDoneTask::new(),
            Arc::clone(&source) as Arc<dyn DataSource>,
            filter,
        )
        .await
        .unwrap();

        assert_eq!(response.result.unwrap()["processed"], 2);
        // The document outside the sample was left untouched.
        assert_eq!(
            source.get("cards", "c").await.unwrap()["status"],
            json!("pending")
        );
    }
}
