use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::source::{DataSource, FindQuery};

/// Whether a run walks the newest or the oldest unprocessed documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStrategy {
    New = 1,
    Old = 2,
}

impl FetchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStrategy::New => "NEW",
            FetchStrategy::Old => "OLD",
        }
    }
}

/// Outcome of one cron run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CronStatus {
    Success,
    Aborted,
    Error,
}

impl CronStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CronStatus::Success => "Success",
            CronStatus::Aborted => "Aborted",
            CronStatus::Error => "Error",
        }
    }
}

/// Failure details carried in an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronErrorInfo {
    pub class: String,
    pub message: String,
}

/// Standard cron run response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronResponse {
    pub status: CronStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BTreeMap<String, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CronErrorInfo>,
}

impl CronResponse {
    pub fn success(result: BTreeMap<String, i64>) -> Self {
        CronResponse {
            status: CronStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(class: impl Into<String>, message: impl Into<String>) -> Self {
        CronResponse {
            status: CronStatus::Error,
            result: None,
            error: Some(CronErrorInfo {
                class: class.into(),
                message: message.into(),
            }),
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        CronResponse {
            status: CronStatus::Aborted,
            result: None,
            error: Some(CronErrorInfo {
                class: "Timeout".to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Metric that gives insight into the backlog a cron still has to
/// process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronStat {
    pub name: String,
    pub value: i64,
}

impl CronStat {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        CronStat {
            name: name.into(),
            value,
        }
    }
}

/// Run arguments fixed at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronArgs {
    pub batch_size: usize,
    pub strategy: Option<FetchStrategy>,
    /// Task-specific arguments beyond the two standard ones.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for CronArgs {
    fn default() -> Self {
        CronArgs {
            batch_size: 100,
            strategy: None,
            extra: Map::new(),
        }
    }
}

impl CronArgs {
    pub fn with_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// JSON form of the non-standard arguments, for run records.
    pub fn extra_json(&self) -> String {
        serde_json::to_string(&self.extra).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Crontab-style schedule fields handed to the external scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    pub minute: String,
    pub hour: String,
    pub day_of_week: String,
}

impl CronSchedule {
    pub fn new(
        minute: impl Into<String>,
        hour: impl Into<String>,
        day_of_week: impl Into<String>,
    ) -> Self {
        CronSchedule {
            minute: minute.into(),
            hour: hour.into(),
            day_of_week: day_of_week.into(),
        }
    }

    /// Every day at the given hour and minute.
    pub fn daily(minute: impl Into<String>, hour: impl Into<String>) -> Self {
        CronSchedule::new(minute, hour, "*")
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} * * {}", self.minute, self.hour, self.day_of_week)
    }
}

/// Extra filter merged into every queryset a task builds during one run.
/// Tests use it to pin a run to a known data sample.
pub type QueryFilter = Map<String, Value>;

/// Collaborators handed to a task body for one run.
#[derive(Clone)]
pub struct CronContext {
    source: Arc<dyn DataSource>,
    filter: Option<QueryFilter>,
}

impl CronContext {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        CronContext {
            source,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    /// Merge the context filter into a query. Task querysets must be
    /// built through this so an injected filter is never bypassed.
    pub fn apply_filter(&self, mut query: FindQuery) -> FindQuery {
        if let Some(filter) = &self.filter {
            for (key, value) in filter {
                query.filter.insert(key.clone(), value.clone());
            }
        }
        query
    }
}

/// A scheduled batch task.
///
/// `process` must be idempotent and resumable: a run can be killed at
/// its time limit and the next scheduled run picks up the remaining
/// backlog.
#[async_trait]
pub trait CronTask: Send + Sync {
    /// Dotted task name, `{app}.{TaskName}`.
    fn name(&self) -> &str;

    fn schedule(&self) -> CronSchedule;

    /// Drop the run if it has not started within this window.
    fn expires(&self) -> Duration {
        Duration::from_secs(60 * 60)
    }

    /// Kill the run once it exceeds this limit.
    fn time_limit(&self) -> Duration {
        Duration::from_secs(60 * 60 * 3)
    }

    fn args(&self) -> &CronArgs;

    /// Process one batch. Returns counters describing the work done.
    async fn process(&self, ctx: &CronContext) -> Result<BTreeMap<String, i64>>;

    /// Backlog metrics recorded after every run.
    async fn stats(&self, ctx: &CronContext) -> Result<Vec<CronStat>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_strings() {
        assert_eq!(CronStatus::Success.as_str(), "Success");
        assert_eq!(CronStatus::Aborted.as_str(), "Aborted");
        assert_eq!(CronStatus::Error.as_str(), "Error");
    }

    #[test]
    fn test_response_serialization_skips_empty_fields() {
        let mut result = BTreeMap::new();
        result.insert("processed".to_string(), 3);
        let encoded = serde_json::to_value(CronResponse::success(result)).unwrap();
        assert_eq!(encoded, json!({"status": "Success", "result": {"processed": 3}}));

        let encoded = serde_json::to_value(CronResponse::error("NotFound", "gone")).unwrap();
        assert_eq!(
            encoded,
            json!({"status": "Error", "error": {"class": "NotFound", "message": "gone"}})
        );
    }

    #[test]
    fn test_args_defaults_and_extra_json() {
        let args = CronArgs::default();
        assert_eq!(args.batch_size, 100);
        assert!(args.strategy.is_none());

        let args = CronArgs::default()
            .with_strategy(FetchStrategy::Old)
            .with_extra("country", json!("US"));
        assert_eq!(args.strategy.unwrap().as_str(), "OLD");
        assert_eq!(args.extra_json(), r#"{"country":"US"}"#);
    }

    #[test]
    fn test_schedule_display() {
        assert_eq!(CronSchedule::daily("30", "4").to_string(), "30 4 * * *");
        assert_eq!(
            CronSchedule::new("0", "*/2", "mon").to_string(),
            "0 */2 * * mon"
        );
    }

    #[test]
    fn test_context_filter_merges_into_query() {
        use crate::source::MemorySource;

        let ctx = CronContext::new(Arc::new(MemorySource::new())).with_filter({
            let mut f = Map::new();
            f.insert("sample".to_string(), json!(true));
            f
        });

        let mut query = FindQuery::default();
        query.filter.insert("status".to_string(), json!("pending"));
        let query = ctx.apply_filter(query);

        assert_eq!(query.filter["status"], json!("pending"));
        assert_eq!(query.filter["sample"], json!(true));
    }
}
