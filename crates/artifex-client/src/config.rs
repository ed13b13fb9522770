// SPDX-License-Identifier: BUSL-1.1
//! Client-side configuration.

use std::time::Duration;

use crate::retry::BlobRetry;

#[derive(Debug, Clone)]
pub struct WorkerClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Backoff for blob downloads.
    pub blob_retry: BlobRetry,
}

impl Default for WorkerClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            blob_retry: BlobRetry::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserContextConfig {
    /// Artifacts kept loaded at once; loading past this idles the least
    /// recently accessed.
    pub max_loaded_artifacts: usize,
    /// Minimum interval between requests for the same file.
    pub request_rate: Duration,
    /// Interval between polls for files awaiting an artifact.
    pub polling_rate: Duration,
    /// Loaded artifacts untouched for this long are idled.
    pub max_inactive: Duration,
    /// How long an idled artifact is kept before its object is released.
    pub idle_grace: Duration,
    /// Interval of the inactivity and release sweep.
    pub cleanup_interval: Duration,
}

impl Default for UserContextConfig {
    fn default() -> Self {
        Self {
            max_loaded_artifacts: 2,
            request_rate: Duration::from_secs(15),
            polling_rate: Duration::from_secs(5),
            max_inactive: Duration::from_secs(30 * 60),
            idle_grace: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}
