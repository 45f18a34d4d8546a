use serde::Deserialize;
use std::env;

/// Page size used when a list call does not specify one.
pub const DEFAULT_LIST_LIMIT: usize = 50;
/// Hard ceiling on a single list page.
pub const MAX_LIST_LIMIT: usize = 500;
/// Operation ceiling for one grouped atomic write. Engine batches are always
/// at most 5 operations (one primary doc plus four index pointers).
pub const MAX_BATCH_OPS: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub db_path: String,
    pub default_list_limit: usize,
    pub max_list_limit: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "./data/filedex.db".to_string()),
            default_list_limit: env::var("DEFAULT_LIST_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_LIST_LIMIT),
            max_list_limit: env::var("MAX_LIST_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(MAX_LIST_LIMIT),
        }
    }
}
