use serde::{Deserialize, Serialize};

/// Runtime environment the process runs under.
///
/// Controls two behaviors: publishing is suppressed entirely in `Dev`
/// (so local development never pollutes a shared broker), and cron
/// processing errors are classified into structured responses only in
/// `Prod` (elsewhere they propagate for fast feedback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnv {
    Dev,
    #[default]
    Test,
    Prod,
}

impl RuntimeEnv {
    /// Read the environment from the `APP_ENV` variable.
    ///
    /// Unknown or unset values map to `Test`: the neutral mode that
    /// neither suppresses publishes nor swallows errors.
    pub fn from_process_env() -> Self {
        match std::env::var("APP_ENV") {
            Ok(value) => Self::parse(&value),
            Err(_) => RuntimeEnv::Test,
        }
    }

    fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "DEV" => RuntimeEnv::Dev,
            "PROD" => RuntimeEnv::Prod,
            _ => RuntimeEnv::Test,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, RuntimeEnv::Dev)
    }

    pub fn is_prod(&self) -> bool {
        matches!(self, RuntimeEnv::Prod)
    }
}
