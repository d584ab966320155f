//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.
//!
//! Binaries read the environment and hand the raw values to the `*_from_env_value` helpers
//! below, which apply defaults and validation without touching the environment themselves.

use crate::constants::{
    BLOBS_DIR_NAME, DEFAULT_MAX_JOB_ATTEMPTS, DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_WORKER_POLL_SECS,
    INDEX_DIR_NAME, OPERATIONS_DIR_NAME,
};
use crate::{CoreError, CoreResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// How frame requests are checked against the payload size limit.
///
/// `Frame` checks the size of each requested frame, so individual frames of an instance that
/// is too large to retrieve whole remain retrievable. `Instance` applies the whole-instance
/// check before any frame is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameSizePolicy {
    #[default]
    Frame,
    Instance,
}

impl FromStr for FrameSizePolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "frame" => Ok(FrameSizePolicy::Frame),
            "instance" => Ok(FrameSizePolicy::Instance),
            other => Err(CoreError::InvalidInput(format!(
                "unknown frame size policy '{}', expected 'frame' or 'instance'",
                other
            ))),
        }
    }
}

impl fmt::Display for FrameSizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSizePolicy::Frame => write!(f, "frame"),
            FrameSizePolicy::Instance => write!(f, "instance"),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    max_payload_bytes: u64,
    frame_size_policy: FrameSizePolicy,
    worker_poll_interval: Duration,
    max_job_attempts: u32,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    pub fn new(
        data_dir: PathBuf,
        max_payload_bytes: u64,
        frame_size_policy: FrameSizePolicy,
        worker_poll_interval: Duration,
        max_job_attempts: u32,
    ) -> CoreResult<Self> {
        if data_dir.as_os_str().is_empty() {
            return Err(CoreError::InvalidInput("data_dir cannot be empty".into()));
        }
        if max_payload_bytes == 0 {
            return Err(CoreError::InvalidInput(
                "max_payload_bytes must be greater than zero".into(),
            ));
        }
        if worker_poll_interval.is_zero() {
            return Err(CoreError::InvalidInput(
                "worker_poll_interval must be greater than zero".into(),
            ));
        }
        if max_job_attempts == 0 {
            return Err(CoreError::InvalidInput(
                "max_job_attempts must be at least 1".into(),
            ));
        }

        Ok(Self {
            data_dir,
            max_payload_bytes,
            frame_size_policy,
            worker_poll_interval,
            max_job_attempts,
        })
    }

    /// Configuration with default limits rooted at `data_dir`.
    pub fn with_defaults(data_dir: PathBuf) -> CoreResult<Self> {
        Self::new(
            data_dir,
            DEFAULT_MAX_PAYLOAD_BYTES,
            FrameSizePolicy::default(),
            Duration::from_secs(DEFAULT_WORKER_POLL_SECS),
            DEFAULT_MAX_JOB_ATTEMPTS,
        )
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join(BLOBS_DIR_NAME)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join(INDEX_DIR_NAME)
    }

    pub fn operations_dir(&self) -> PathBuf {
        self.data_dir.join(OPERATIONS_DIR_NAME)
    }

    pub fn max_payload_bytes(&self) -> u64 {
        self.max_payload_bytes
    }

    pub fn frame_size_policy(&self) -> FrameSizePolicy {
        self.frame_size_policy
    }

    pub fn worker_poll_interval(&self) -> Duration {
        self.worker_poll_interval
    }

    pub fn max_job_attempts(&self) -> u32 {
        self.max_job_attempts
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_positive<T>(name: &str, value: &str) -> CoreResult<T>
where
    T: FromStr + PartialOrd + Default,
{
    match value.parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        _ => Err(CoreError::InvalidInput(format!(
            "{} must be a positive integer, got '{}'",
            name, value
        ))),
    }
}

/// Resolve the payload size limit from an optional environment value.
pub fn max_payload_bytes_from_env_value(value: Option<String>) -> CoreResult<u64> {
    non_empty(value)
        .map(|v| parse_positive::<u64>("DICOMSTORE_MAX_PAYLOAD_BYTES", &v))
        .transpose()
        .map(|v| v.unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES))
}

/// Resolve the frame size policy from an optional environment value.
pub fn frame_size_policy_from_env_value(value: Option<String>) -> CoreResult<FrameSizePolicy> {
    let parsed = non_empty(value)
        .map(|v| v.parse::<FrameSizePolicy>())
        .transpose()?;

    Ok(parsed.unwrap_or_default())
}

/// Resolve the worker poll interval (in seconds) from an optional environment value.
pub fn worker_poll_interval_from_env_value(value: Option<String>) -> CoreResult<Duration> {
    let secs = non_empty(value)
        .map(|v| parse_positive::<u64>("DICOMSTORE_WORKER_POLL_SECS", &v))
        .transpose()?;

    Ok(Duration::from_secs(secs.unwrap_or(DEFAULT_WORKER_POLL_SECS)))
}

/// Resolve the job attempt limit from an optional environment value.
pub fn max_job_attempts_from_env_value(value: Option<String>) -> CoreResult<u32> {
    let attempts = non_empty(value)
        .map(|v| parse_positive::<u32>("DICOMSTORE_MAX_JOB_ATTEMPTS", &v))
        .transpose()?;

    Ok(attempts.unwrap_or(DEFAULT_MAX_JOB_ATTEMPTS))
}
