use serde::{Deserialize, Serialize};

/// Worker process settings, loadable from YAML and overridable on the
/// command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Stable worker name. When unset a unique one is generated so two
    /// workers on the same host never share queue consumer identity.
    pub name: Option<String>,
    /// Per-queue unacknowledged message cap.
    pub prefetch: usize,
    /// Topic patterns whose queue pairs this worker declares and
    /// consumes. Broad broker-side patterns like `sap.#` are typical.
    pub bind_topics: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            name: None,
            prefetch: 10,
            bind_topics: vec!["sap.#".to_string()],
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Resolve the worker name, generating `hostname-pid-xxxxxxxx` when
    /// none is configured.
    pub fn worker_name(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(name) = &self.name {
            return name.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let random = Uuid::new_v4().to_string().split('-').next().unwrap().to_string();

        format!("{}-{}-{}", hostname, pid, random)
    }
}
