use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::error::{CronError, Result};
use crate::task::{CronArgs, CronSchedule, CronTask};

/// One scheduler entry, exported to whatever drives the crontab.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleEntry {
    /// Unique entry key, `{task_name}:{args}`. The same task can be
    /// scheduled more than once with different arguments.
    pub uid: String,
    pub task_name: String,
    pub schedule: CronSchedule,
    pub args: CronArgs,
    /// Window after the scheduled moment in which the run may still
    /// start.
    pub expires: Duration,
}

/// Explicit registration table for scheduled tasks.
#[derive(Default)]
pub struct CronRegistry {
    tasks: RwLock<HashMap<String, Arc<dyn CronTask>>>,
    entries: RwLock<Vec<ScheduleEntry>>,
}

impl CronRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task for scheduling. Re-registering the same task
    /// with the same arguments is rejected.
    pub fn register(&self, task: Arc<dyn CronTask>) -> Result<ScheduleEntry> {
        let uid = format!("{}:{}", task.name(), serde_json::to_string(task.args())?);

        let mut tasks = self.tasks.write();
        if tasks.contains_key(&uid) {
            return Err(CronError::DuplicateSchedule(uid));
        }

        let entry = ScheduleEntry {
            uid: uid.clone(),
            task_name: task.name().to_string(),
            schedule: task.schedule(),
            args: task.args().clone(),
            expires: task.expires(),
        };
        debug!(uid = %entry.uid, schedule = %entry.schedule, "Registered cron task");

        tasks.insert(uid, task);
        self.entries.write().push(entry.clone());
        Ok(entry)
    }

    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.entries.read().clone()
    }

    pub fn task(&self, uid: &str) -> Option<Arc<dyn CronTask>> {
        self.tasks.read().get(uid).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
