use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Orchestrator YAML; built-in defaults when unset.
    #[serde(default = "default_config_path")]
    pub config_path: Option<PathBuf>,

    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

fn default_bind_addr() -> String {
    std::env::var("IDE_API_BIND").unwrap_or_else(|_| "0.0.0.0:3130".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("IDE_API_DB_PATH") {
        return PathBuf::from(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".ide-orchestrator")
        .join("api")
        .join("ide.db")
}

fn default_config_path() -> Option<PathBuf> {
    std::env::var("IDE_API_CONFIG")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
}

fn default_janitor_interval() -> u64 {
    std::env::var("IDE_API_JANITOR_INTERVAL")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(300) // 5 minutes
}

fn default_reconcile_interval() -> u64 {
    std::env::var("IDE_API_RECONCILE_INTERVAL")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(600) // 10 minutes
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            config_path: default_config_path(),
            janitor_interval_secs: default_janitor_interval(),
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}
