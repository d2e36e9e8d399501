use std::env;
use std::path::Path;
use std::time::Duration;

use eyre::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

const KB: usize = 1024;
const MB: usize = 1024 * KB;

pub const DEFAULT_BUFFER_SIZE: usize = 4 * MB;
pub const DEFAULT_MAX_OUTSTANDING: usize = 1024;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_LIST_PAGE_SIZE: usize = 250;
/// Hard upper bound object stores place on a single list call.
pub const MAX_LIST_PAGE_SIZE: usize = 5000;
pub const DEFAULT_LIST_RETRY_ATTEMPTS: u8 = 3;
pub const DEFAULT_LIST_RETRY_DELAY_MS: u64 = 10_000;

const MEMORY_CAPACITY_ENV: &str = "FERRY_MEMORY_CAPACITY";
const MAX_OUTSTANDING_ENV: &str = "FERRY_MAX_OUTSTANDING";
const STUCK_TIMEOUT_ENV: &str = "FERRY_STUCK_TIMEOUT_MS";

static AVAILABLE_MEMORY: OnceCell<u64> = OnceCell::new();

/// Limits governing memory, backlog and listing behaviour for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferLimits {
    /// Size of each pooled buffer in bytes.
    pub buffer_size: usize,
    /// Total bytes the buffer pool may hand out at once.
    pub memory_capacity: usize,
    /// Outstanding transfer tasks tolerated before enumeration pauses.
    pub max_outstanding_tasks: usize,
    pub poll_interval_ms: u64,
    /// Abort the job when enumeration stays paused this long. `None` waits forever.
    pub stuck_timeout_ms: Option<u64>,
    pub list_page_size: usize,
    pub list_retry_attempts: u8,
    pub list_retry_delay_ms: u64,
    /// Concurrent attribute lookups issued while listing a share directory.
    pub attribute_parallelism: usize,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            memory_capacity: default_memory_capacity(),
            max_outstanding_tasks: DEFAULT_MAX_OUTSTANDING,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            stuck_timeout_ms: None,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            list_retry_attempts: DEFAULT_LIST_RETRY_ATTEMPTS,
            list_retry_delay_ms: DEFAULT_LIST_RETRY_DELAY_MS,
            attribute_parallelism: num_cpus::get().max(1),
        }
    }
}

impl TransferLimits {
    /// Read limits from a TOML file. Fields left out keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read limits file: {}", path.display()))?;
        let limits: TransferLimits = toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse limits file: {}", path.display()))?;
        limits.validate()?;
        Ok(limits)
    }

    /// Apply `FERRY_*` environment overrides on top of the current values.
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Some(value) = read_env::<usize>(MEMORY_CAPACITY_ENV)? {
            self.memory_capacity = value;
        }
        if let Some(value) = read_env::<usize>(MAX_OUTSTANDING_ENV)? {
            self.max_outstanding_tasks = value;
        }
        if let Some(value) = read_env::<u64>(STUCK_TIMEOUT_ENV)? {
            self.stuck_timeout_ms = if value == 0 { None } else { Some(value) };
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize(self.buffer_size));
        }
        if self.memory_capacity == 0 {
            return Err(ConfigError::InvalidCapacity(self.memory_capacity));
        }
        if self.max_outstanding_tasks == 0 {
            return Err(ConfigError::InvalidCapacity(self.max_outstanding_tasks));
        }
        if self.list_page_size == 0 {
            return Err(ConfigError::InvalidCapacity(self.list_page_size));
        }
        if self.attribute_parallelism == 0 {
            return Err(ConfigError::InvalidCapacity(self.attribute_parallelism));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stuck_timeout(&self) -> Option<Duration> {
        self.stuck_timeout_ms.map(Duration::from_millis)
    }

    pub fn list_retry_delay(&self) -> Duration {
        Duration::from_millis(self.list_retry_delay_ms)
    }

    /// Page size actually sent to the backend.
    pub fn effective_page_size(&self) -> usize {
        self.list_page_size.clamp(1, MAX_LIST_PAGE_SIZE)
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .wrap_err_with(|| format!("invalid value for {name}: {raw}")),
        Err(_) => Ok(None),
    }
}

/// One tenth of the memory the system reports as available.
pub fn default_memory_capacity() -> usize {
    let available = *AVAILABLE_MEMORY.get_or_init(available_memory);
    if available == 0 {
        // Some containers report nothing; fall back to a modest fixed budget.
        return 512 * MB;
    }
    (available / 10).max(DEFAULT_BUFFER_SIZE as u64) as usize
}

fn available_memory() -> u64 {
    use sysinfo::System;
    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let limits = TransferLimits::default();
        assert!(limits.validate().is_ok());
        assert_eq!(limits.list_page_size, 250);
        assert_eq!(limits.list_retry_attempts, 3);
        assert_eq!(limits.list_retry_delay(), Duration::from_secs(10));
        assert!(limits.stuck_timeout().is_none());
        assert!(limits.memory_capacity >= limits.buffer_size);
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("limits.toml");
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "buffer_size = 1024")?;
        writeln!(file, "memory_capacity = 8192")?;
        writeln!(file, "stuck_timeout_ms = 30000")?;
        drop(file);

        let limits = TransferLimits::load(&path)?;
        assert_eq!(limits.buffer_size, 1024);
        assert_eq!(limits.memory_capacity, 8192);
        assert_eq!(limits.stuck_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(limits.max_outstanding_tasks, DEFAULT_MAX_OUTSTANDING);
        Ok(())
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let limits = TransferLimits {
            max_outstanding_tasks: 0,
            ..TransferLimits::default()
        };
        assert_eq!(limits.validate(), Err(ConfigError::InvalidCapacity(0)));

        let limits = TransferLimits {
            buffer_size: 0,
            ..TransferLimits::default()
        };
        assert_eq!(limits.validate(), Err(ConfigError::InvalidBufferSize(0)));
    }

    #[test]
    fn page_size_is_clamped() {
        let limits = TransferLimits {
            list_page_size: 100_000,
            ..TransferLimits::default()
        };
        assert_eq!(limits.effective_page_size(), MAX_LIST_PAGE_SIZE);
    }
}
