use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{CronError, Result};
use crate::storage::CronStorage;
use crate::task::{CronResponse, CronStat, CronTask};

pub const TABLE_TASKS: &str = "Tasks";
pub const TABLE_RUNS: &str = "Runs";
pub const TABLE_STATS: &str = "Stats";

/// One row in a tracking sheet table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetRecord {
    pub id: String,
    pub fields: Map<String, Value>,
}

/// Minimal tracking-sheet API: enough to upsert task rows and append
/// run and stat rows.
#[async_trait]
pub trait SheetClient: Send + Sync {
    /// First record whose fields equal the filter, if any.
    async fn first(&self, table: &str, filter: &Map<String, Value>)
        -> Result<Option<SheetRecord>>;

    async fn create(&self, table: &str, fields: Map<String, Value>) -> Result<SheetRecord>;

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<SheetRecord>;
}

#[derive(Debug, Deserialize)]
struct RecordList {
    records: Vec<SheetRecord>,
}

/// REST client for a hosted tracking sheet.
pub struct HttpSheetClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSheetClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        HttpSheetClient {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), table)
    }
}

#[async_trait]
impl SheetClient for HttpSheetClient {
    async fn first(
        &self,
        table: &str,
        filter: &Map<String, Value>,
    ) -> Result<Option<SheetRecord>> {
        let query: Vec<(String, String)> = filter
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect();

        let list: RecordList = self
            .client
            .get(self.table_url(table))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(list.records.into_iter().next())
    }

    async fn create(&self, table: &str, fields: Map<String, Value>) -> Result<SheetRecord> {
        let record = self
            .client
            .post(self.table_url(table))
            .bearer_auth(&self.token)
            .json(&json!({ "fields": fields }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(record)
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<SheetRecord> {
        let record = self
            .client
            .patch(format!("{}/{}", self.table_url(table), id))
            .bearer_auth(&self.token)
            .json(&json!({ "fields": fields }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(record)
    }
}

/// In-memory sheet used by tests.
#[derive(Default)]
pub struct MemorySheet {
    tables: RwLock<HashMap<String, Vec<SheetRecord>>>,
    next_id: AtomicU64,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, table: &str) -> Vec<SheetRecord> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SheetClient for MemorySheet {
    async fn first(
        &self,
        table: &str,
        filter: &Map<String, Value>,
    ) -> Result<Option<SheetRecord>> {
        let tables = self.tables.read();
        Ok(tables.get(table).and_then(|rows| {
            rows.iter()
                .find(|row| {
                    filter
                        .iter()
                        .all(|(key, value)| row.fields.get(key) == Some(value))
                })
                .cloned()
        }))
    }

    async fn create(&self, table: &str, fields: Map<String, Value>) -> Result<SheetRecord> {
        let record = SheetRecord {
            id: format!("rec{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
            fields,
        };
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<SheetRecord> {
        let mut tables = self.tables.write();
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| row.id == id))
            .ok_or_else(|| CronError::Storage(format!("no record '{id}' in table '{table}'")))?;
        for (key, value) in fields {
            row.fields.insert(key, value);
        }
        Ok(row.clone())
    }
}

/// Cron storage backed by a tracking sheet with Tasks, Runs and Stats
/// tables.
pub struct SheetStorage {
    client: Arc<dyn SheetClient>,
    project: String,
    env_name: String,
    env_id: String,
    task_id: Mutex<Option<String>>,
    run_id: Mutex<Option<String>>,
}

impl SheetStorage {
    pub fn new(
        client: Arc<dyn SheetClient>,
        project: impl Into<String>,
        env_name: impl Into<String>,
        env_id: impl Into<String>,
    ) -> Self {
        SheetStorage {
            client,
            project: project.into(),
            env_name: env_name.into(),
            env_id: env_id.into(),
            task_id: Mutex::new(None),
            run_id: Mutex::new(None),
        }
    }

    fn task_id(&self) -> Result<String> {
        self.task_id
            .lock()
            .clone()
            .ok_or_else(|| CronError::Storage("task was never recorded".to_string()))
    }
}

#[async_trait]
impl CronStorage for SheetStorage {
    /// Upsert the Tasks row keyed by (env, name).
    async fn record_task(&self, task: &dyn CronTask) -> Result<()> {
        let mut filter = Map::new();
        filter.insert("Env".to_string(), json!(self.env_name));
        filter.insert("Name".to_string(), json!(task.name()));
        let existing = self.client.first(TABLE_TASKS, &filter).await?;

        let app = task.name().split('.').next().unwrap_or_default();
        let mut fields = Map::new();
        fields.insert("Project".to_string(), json!(self.project));
        fields.insert("Name".to_string(), json!(task.name()));
        fields.insert("Microapp".to_string(), json!(app));
        fields.insert("Env".to_string(), json!([self.env_id]));

        let record = match existing {
            Some(record) => self.client.update(TABLE_TASKS, &record.id, fields).await?,
            None => self.client.create(TABLE_TASKS, fields).await?,
        };
        debug!(task = task.name(), record = %record.id, "Recorded task");
        *self.task_id.lock() = Some(record.id);
        Ok(())
    }

    async fn record_run_start(&self, task: &dyn CronTask) -> Result<()> {
        let args = task.args();
        let strategy = args
            .strategy
            .map(|s| s.as_str())
            .unwrap_or("NONE");

        let mut fields = Map::new();
        fields.insert("Task".to_string(), json!([self.task_id()?]));
        fields.insert("Status".to_string(), json!("Running"));
        fields.insert("Batch Size".to_string(), json!(args.batch_size));
        fields.insert("Strategy".to_string(), json!(strategy));
        fields.insert("Arguments".to_string(), json!(args.extra_json()));
        fields.insert("Started".to_string(), json!(Utc::now().to_rfc3339()));

        let run = self.client.create(TABLE_RUNS, fields).await?;
        *self.run_id.lock() = Some(run.id);
        Ok(())
    }

    async fn record_run_end(&self, response: &CronResponse) -> Result<()> {
        let run_id = self
            .run_id
            .lock()
            .clone()
            .ok_or_else(|| CronError::Storage("run was never started".to_string()))?;

        let status = if response.is_error() { "Error" } else { "Success" };
        let mut fields = Map::new();
        fields.insert("Response".to_string(), json!(serde_json::to_string(response)?));
        fields.insert("Status".to_string(), json!(status));
        fields.insert("Ended".to_string(), json!(Utc::now().to_rfc3339()));

        self.client.update(TABLE_RUNS, &run_id, fields).await?;
        Ok(())
    }

    async fn record_stats(&self, stats: &[CronStat]) -> Result<()> {
        let task_id = self.task_id()?;
        for stat in stats {
            let mut fields = Map::new();
            fields.insert("Task".to_string(), json!([task_id]));
            fields.insert("Key".to_string(), json!(stat.name));
            fields.insert("Value".to_string(), json!(stat.value));
            self.client.create(TABLE_STATS, fields).await?;
        }
        Ok(())
    }
}
