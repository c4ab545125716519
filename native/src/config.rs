use crate::error::{PipeError, Result};
use std::time::Duration;

/// Host name addressing the local machine.
pub const LOCAL_HOST: &str = ".";

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3);

/// Watcher settings supplied by the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    pub host: String,
    pub refresh_interval: Duration,
    /// Query owner, group and DACL of every pipe on each tick.
    pub read_acls: bool,
    pub start_immediately: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            host: LOCAL_HOST.to_string(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            read_acls: false,
            start_immediately: true,
        }
    }
}

impl WatchConfig {
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = normalize_host(host);
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_read_acls(mut self, read_acls: bool) -> Self {
        self.read_acls = read_acls;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_interval(self.refresh_interval)
    }
}

/// Empty host names and surrounding backslashes address the local machine.
pub fn normalize_host(host: &str) -> String {
    let trimmed = host.trim().trim_matches('\\');
    if trimmed.is_empty() {
        LOCAL_HOST.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn validate_interval(interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Err(PipeError::Configuration(
            "refresh interval must be positive".to_string(),
        ));
    }
    Ok(())
}
