use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::UserId;

/// Runtime settings, read from `SLOTLINE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub resource: String,
    pub user: Option<UserId>,
    pub admins: HashSet<UserId>,
    /// Deadline for every backend call. `None` waits forever.
    pub call_timeout: Option<Duration>,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            resource: "default-resource".into(),
            user: None,
            admins: HashSet::new(),
            call_timeout: Some(Duration::from_millis(10_000)),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let timeout_ms = get("SLOTLINE_CALL_TIMEOUT_MS").and_then(|s| s.parse::<u64>().ok());
        let call_timeout = match timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.call_timeout,
        };
        Self {
            data_dir: get("SLOTLINE_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            resource: get("SLOTLINE_RESOURCE")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.resource),
            user: get("SLOTLINE_USER").filter(|s| !s.is_empty()).map(UserId::new),
            admins: get("SLOTLINE_ADMINS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(UserId::from)
                        .collect()
                })
                .unwrap_or_default(),
            call_timeout,
            compact_threshold: get("SLOTLINE_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            metrics_port: get("SLOTLINE_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
