// SPDX-License-Identifier: BUSL-1.1
//! Server configuration, from command-line flags or `ARTIFEX_*`
//! environment variables.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use artifex_blobcache::{BlobCacheConfig, DEFAULT_CHECK_EVERY, DEFAULT_MAX_BYTES};

use crate::artifact_cache::{ArtifactCacheConfig, MatchPolicy};
use crate::worker::BuildWorkerConfig;

/// Artifex build server.
///
/// Accepts build requests, runs builders against each user's file set, and
/// serves the resulting artifacts over HTTP.
#[derive(Parser, Debug, Clone)]
#[command(name = "artifex-server", version, about, long_about = None)]
pub struct ServerConfig {
    /// Port to listen on.
    #[arg(long, env = "ARTIFEX_PORT", default_value_t = 8070)]
    pub port: u16,

    /// Directory holding artifact blobs.
    #[arg(long, env = "ARTIFEX_BLOB_DIR", default_value = "artifex-blobs")]
    pub blob_dir: PathBuf,

    /// Size budget of the blob directory, in bytes.
    #[arg(long, env = "ARTIFEX_BLOB_MAX_BYTES", default_value_t = DEFAULT_MAX_BYTES)]
    pub blob_max_bytes: u64,

    /// Bytes written between blob directory capacity checks.
    #[arg(long, env = "ARTIFEX_BLOB_CHECK_EVERY", default_value_t = DEFAULT_CHECK_EVERY)]
    pub blob_check_every: u64,

    /// Number of concurrent build workers.
    #[arg(long, env = "ARTIFEX_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Build deadline in seconds.
    #[arg(long, env = "ARTIFEX_BUILD_DEADLINE_SECS", default_value_t = 120)]
    pub build_deadline_secs: u64,

    /// Seconds an artifact may go untouched before it is aged out.
    #[arg(long, env = "ARTIFEX_ARTIFACT_EXPIRATION_SECS", default_value_t = 3600)]
    pub artifact_expiration_secs: u64,

    /// Seconds the blobs of an evicted artifact remain servable.
    #[arg(long, env = "ARTIFEX_RETIRED_GRACE_SECS", default_value_t = 600)]
    pub retired_grace_secs: u64,

    /// Idle worker queue re-check interval in milliseconds.
    #[arg(long, env = "ARTIFEX_IDLE_POLL_MS", default_value_t = 1000)]
    pub idle_poll_ms: u64,

    /// Which artifact wins when several cover a query.
    #[arg(long, env = "ARTIFEX_MATCH_POLICY", value_enum, default_value_t = MatchPolicy::MostRecentlyPublished)]
    pub match_policy: MatchPolicy,

    /// Source tree served to every (user, machine) in standalone mode.
    #[arg(long, env = "ARTIFEX_SOURCE_ROOT", default_value = ".")]
    pub source_root: PathBuf,

    /// Emit logs as JSON.
    #[arg(long, env = "ARTIFEX_JSON_LOGS")]
    pub json_logs: bool,
}

impl ServerConfig {
    pub fn blob_cache(&self) -> BlobCacheConfig {
        BlobCacheConfig {
            dir: self.blob_dir.clone(),
            max_bytes: self.blob_max_bytes,
            check_every: self.blob_check_every,
        }
    }

    pub fn artifact_cache(&self) -> ArtifactCacheConfig {
        ArtifactCacheConfig {
            expiration: Duration::from_secs(self.artifact_expiration_secs),
            retired_grace: Duration::from_secs(self.retired_grace_secs),
            policy: self.match_policy,
        }
    }

    pub fn worker(&self) -> BuildWorkerConfig {
        BuildWorkerConfig {
            deadline: Duration::from_secs(self.build_deadline_secs),
            concurrency: self.workers,
            idle_interval: Duration::from_millis(self.idle_poll_ms),
        }
    }
}
