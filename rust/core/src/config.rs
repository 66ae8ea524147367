//! Run configuration

use crate::{Method, Result, TransferError, DEFAULT_ASYNCIOS, DEFAULT_HEAP_SIZE, MAX_HEAP_SIZE, MIB};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Benchmark configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Heap size in bytes
    #[serde(default = "default_heap_size")]
    pub heap_size: usize,

    /// Number of asynchronous operations the heap is split into
    #[serde(default = "default_asyncios")]
    pub asyncios: usize,

    /// Run only this method; all methods when absent
    #[serde(default)]
    pub method: Option<Method>,

    /// Scratch backing file location
    #[serde(default = "default_scratch_path")]
    pub scratch_path: PathBuf,

    /// Bounded wait used by the AIO method between polls, in milliseconds
    #[serde(default = "default_aio_timeout_ms")]
    pub aio_timeout_ms: u64,

    /// Sleep between polls of the overlapped method, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Treat an abnormal child exit as a fatal run error
    #[serde(default = "default_strict_child_status")]
    pub strict_child_status: bool,

    /// Log filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_heap_size() -> usize {
    DEFAULT_HEAP_SIZE
}

fn default_asyncios() -> usize {
    DEFAULT_ASYNCIOS
}

fn default_scratch_path() -> PathBuf {
    PathBuf::from(crate::DEFAULT_SCRATCH_PATH)
}

fn default_aio_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_strict_child_status() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            heap_size: default_heap_size(),
            asyncios: default_asyncios(),
            method: None,
            scratch_path: default_scratch_path(),
            aio_timeout_ms: default_aio_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            strict_child_status: default_strict_child_status(),
            log_level: default_log_level(),
        }
    }
}

impl TransferConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            TransferError::Configuration(format!(
                "cannot read config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        let config: TransferConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Set the heap size from a megabyte count
    pub fn with_heap_mb(mut self, megabytes: u64) -> Result<Self> {
        self.heap_size = heap_size_from_mb(megabytes)?;
        Ok(self)
    }

    pub fn with_asyncios(mut self, asyncios: usize) -> Self {
        self.asyncios = asyncios;
        self
    }

    pub fn with_method(mut self, method: Option<Method>) -> Self {
        self.method = method;
        self
    }

    pub fn with_scratch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_path = path.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.heap_size == 0 {
            return Err(TransferError::Configuration(
                "heap size must be greater than 0".to_string(),
            ));
        }

        if self.heap_size > MAX_HEAP_SIZE {
            return Err(TransferError::Configuration(format!(
                "size {} is too big, sorry (max {})",
                self.heap_size, MAX_HEAP_SIZE
            )));
        }

        if self.asyncios == 0 {
            return Err(TransferError::Configuration(
                "asyncios must be greater than 0".to_string(),
            ));
        }

        if self.heap_size % self.asyncios != 0 {
            return Err(TransferError::Configuration(format!(
                "{} asyncios don't divide heapsize {} evenly",
                self.asyncios, self.heap_size
            )));
        }

        if self.aio_timeout_ms == 0 || self.poll_interval_ms == 0 {
            return Err(TransferError::Configuration(
                "aio timeout and poll interval must be greater than 0".to_string(),
            ));
        }

        let parent = self
            .scratch_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if !parent.is_dir() {
            return Err(TransferError::Configuration(format!(
                "scratch directory {} does not exist",
                parent.display()
            )));
        }

        Ok(())
    }

    /// Methods selected for this run, in order
    pub fn selected_methods(&self) -> Vec<Method> {
        match self.method {
            Some(method) => vec![method],
            None => Method::ALL.to_vec(),
        }
    }

    /// Size of one asynchronous chunk
    pub fn chunk_size(&self) -> usize {
        self.heap_size / self.asyncios
    }

    pub fn aio_timeout(&self) -> Duration {
        Duration::from_millis(self.aio_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Convert a megabyte count to bytes, rejecting anything above a signed 32-bit count
pub fn heap_size_from_mb(megabytes: u64) -> Result<usize> {
    let bytes = megabytes
        .checked_mul(MIB as u64)
        .filter(|bytes| *bytes <= MAX_HEAP_SIZE as u64)
        .ok_or_else(|| {
            TransferError::Configuration(format!(
                "size {} MB is too big, sorry (max {} MB)",
                megabytes,
                MAX_HEAP_SIZE / MIB
            ))
        })?;
    Ok(bytes as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn scratch_config(dir: &tempfile::TempDir) -> TransferConfig {
        TransferConfig::default().with_scratch_path(dir.path().join("heapfile"))
    }

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.heap_size, 128 * MIB);
        assert_eq!(config.asyncios, 4);
        assert_eq!(config.chunk_size(), 32 * MIB);
        assert!(config.strict_child_status);
        assert_eq!(config.selected_methods().len(), Method::COUNT);
    }

    #[rstest]
    #[case(100, 3, false)]
    #[case(100, 4, true)]
    #[case(64 * MIB, 4, true)]
    #[case(16 * MIB, 1, true)]
    #[case(0, 1, false)]
    #[case(MIB, 0, false)]
    #[case(MAX_HEAP_SIZE + 1, 1, false)]
    fn test_validation(#[case] heap_size: usize, #[case] asyncios: usize, #[case] valid: bool) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scratch_config(&dir).with_asyncios(asyncios);
        config.heap_size = heap_size;
        assert_eq!(config.validate().is_ok(), valid);
    }

    #[test]
    fn test_indivisible_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scratch_config(&dir).with_asyncios(3);
        config.heap_size = 100;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: 3 asyncios don't divide heapsize 100 evenly"
        );
    }

    #[test]
    fn test_missing_scratch_directory() {
        let config = TransferConfig::default().with_scratch_path("/nonexistent-dir/heapfile");
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case(1, Some(MIB))]
    #[case(2047, Some(2047 * MIB))]
    #[case(2048, None)]
    #[case(u64::MAX, None)]
    fn test_heap_size_from_mb(#[case] mb: u64, #[case] expected: Option<usize>) {
        assert_eq!(heap_size_from_mb(mb).ok(), expected);
    }

    #[test]
    fn test_selected_single_method() {
        let config = TransferConfig::default().with_method(Some(Method::AioWrite));
        assert_eq!(config.selected_methods(), vec![Method::AioWrite]);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heapxfer.toml");
        std::fs::write(
            &path,
            concat!(
                "heap_size = 8388608\nasyncios = 2\n",
                "method = \"RemoteWrite\"\nstrict_child_status = false\n",
            ),
        )
        .unwrap();

        let config = TransferConfig::from_file(&path).unwrap();
        assert_eq!(config.heap_size, 8 * MIB);
        assert_eq!(config.asyncios, 2);
        assert_eq!(config.method, Some(Method::RemoteWrite));
        assert!(!config.strict_child_status);
        assert_eq!(config.aio_timeout_ms, 5000);
    }
}
