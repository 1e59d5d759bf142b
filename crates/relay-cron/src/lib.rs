//! Scheduled batch tasks.
//!
//! Cron tasks run on worker servers independently of any live request
//! traffic. Each run walks a fixed lifecycle: the task is registered
//! with the storage backend, the run start is recorded, the task body
//! processes a batch of documents, the run end is recorded with the
//! outcome, and finally backlog stats are computed and recorded.

pub mod error;
pub mod registry;
pub mod runner;
pub mod sheet;
pub mod source;
pub mod storage;
pub mod task;

pub use error::{CronError, Result};
pub use registry::{CronRegistry, ScheduleEntry};
pub use runner::CronRunner;
pub use sheet::{HttpSheetClient, MemorySheet, SheetClient, SheetRecord, SheetStorage};
pub use source::{Cursor, DataSource, FindQuery, MemorySource, SortOrder};
pub use storage::{CronStorage, TestStorage};
pub use task::{
    CronArgs, CronContext, CronErrorInfo, CronResponse, CronSchedule, CronStat, CronStatus,
    CronTask, FetchStrategy, QueryFilter,
};
