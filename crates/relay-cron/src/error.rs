use thiserror::Error;

#[derive(Error, Debug)]
pub enum CronError {
    #[error("Document not found in '{collection}'")]
    NotFound { collection: String },

    #[error("Task '{0}' is already registered with these arguments")]
    DuplicateSchedule(String),

    #[error("Storage request failed: {0}")]
    Storage(String),

    #[error("Task failed: {0}")]
    Process(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl CronError {
    /// Short class name used when classifying a failure into a run
    /// record.
    pub fn class(&self) -> &'static str {
        match self {
            CronError::NotFound { .. } => "NotFound",
            CronError::DuplicateSchedule(_) => "DuplicateSchedule",
            CronError::Storage(_) => "Storage",
            CronError::Process(_) => "Process",
            CronError::Serialization(_) => "Serialization",
            CronError::Http(_) => "Http",
        }
    }
}

pub type Result<T> = std::result::Result<T, CronError>;
