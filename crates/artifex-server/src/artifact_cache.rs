// SPDX-License-Identifier: BUSL-1.1
//! # Artifact cache
//!
//! In-memory index of published artifacts over blob storage. Publishing
//! evicts every entry the new artifact subsumes and every entry not
//! touched within the expiration window; there is no LRU at this layer.
//!
//! `find_matching` is a linear scan over live entries. Eviction keeps the
//! entry count small: one live artifact per distinct path set per
//! (user, machine), plus whatever has not yet aged out.
//!
//! An evicted artifact leaves a tombstone with its blob names for
//! `retired_grace`, so a client that matched it just before a rebuild can
//! still fetch its blobs while they remain on disk.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::time::Instant;

use artifex_blobcache::{BlobCache, BlobCacheError};
use artifex_core::{artifact_key, path, Artifact, ArtifactId, Machine, UserId, UserMachineFile};

/// Tie-break among several artifacts covering the same query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MatchPolicy {
    /// The artifact published last wins.
    #[default]
    MostRecentlyPublished,
    /// The artifact indexing the most paths wins; publication order breaks
    /// ties.
    MostFiles,
}

#[derive(Debug, Clone)]
pub struct ArtifactCacheConfig {
    pub expiration: Duration,
    /// How long the blobs of an evicted artifact stay servable.
    pub retired_grace: Duration,
    pub policy: MatchPolicy,
}

impl Default for ArtifactCacheConfig {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(60 * 60),
            retired_grace: Duration::from_secs(10 * 60),
            policy: MatchPolicy::MostRecentlyPublished,
        }
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("unknown artifact {0}")]
    UnknownArtifact(ArtifactId),

    #[error("artifact {uuid} has no blob {name}")]
    UnknownBlob { uuid: ArtifactId, name: String },

    #[error(transparent)]
    Blob(#[from] BlobCacheError),
}

struct Entry {
    artifact: Arc<Artifact>,
    /// Publication order.
    seq: u64,
    accessed_at: Mutex<Instant>,
}

impl Entry {
    fn touch(&self) {
        *self.accessed_at.lock() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.accessed_at.lock())
    }
}

/// Blob names of an evicted artifact.
struct Tombstone {
    files: Vec<String>,
    retired_at: Instant,
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<ArtifactId, Entry>,
    retired: HashMap<ArtifactId, Tombstone>,
    seq: u64,
}

/// What a publish removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub subsumed: Vec<ArtifactId>,
    pub expired: Vec<ArtifactId>,
}

pub struct ArtifactCache {
    entries: RwLock<Entries>,
    blobs: BlobCache,
    config: ArtifactCacheConfig,
}

impl fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("artifacts", &self.len())
            .field("blobs", &self.blobs)
            .field("config", &self.config)
            .finish()
    }
}

impl ArtifactCache {
    pub fn new(blobs: BlobCache, config: ArtifactCacheConfig) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            blobs,
            config,
        }
    }

    pub fn blobs(&self) -> &BlobCache {
        &self.blobs
    }

    pub fn len(&self) -> usize {
        self.entries.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `artifact`, evicting what it subsumes and what has expired.
    ///
    /// Evicted blobs stay in the blob cache until its own eviction reclaims
    /// them; clients that fetched the artifact a moment ago can still read
    /// them for `retired_grace`.
    pub fn publish(&self, artifact: Artifact) -> PublishReport {
        let now = Instant::now();
        let mut report = PublishReport::default();
        let mut guard = self.entries.write();
        let entries = &mut *guard;
        let grace = self.config.retired_grace;
        entries
            .retired
            .retain(|_, t| now.saturating_duration_since(t.retired_at) <= grace);
        let mut evicted = Vec::new();
        entries.by_id.retain(|id, entry| {
            if artifact.subsumes(&entry.artifact) {
                report.subsumed.push(*id);
            } else if entry.idle_for(now) > self.config.expiration {
                report.expired.push(*id);
            } else {
                return true;
            }
            evicted.push((*id, entry.artifact.files.clone()));
            false
        });
        for (id, files) in evicted {
            entries.retired.insert(
                id,
                Tombstone {
                    files,
                    retired_at: now,
                },
            );
        }
        entries.seq += 1;
        let seq = entries.seq;
        let id = artifact.uuid;
        entries.by_id.insert(
            id,
            Entry {
                artifact: Arc::new(artifact),
                seq,
                accessed_at: Mutex::new(now),
            },
        );
        drop(guard);

        if !report.subsumed.is_empty() || !report.expired.is_empty() {
            tracing::debug!(
                artifact = %id,
                subsumed = report.subsumed.len(),
                expired = report.expired.len(),
                "evicted artifacts on publish"
            );
        }
        report
    }

    pub fn get(&self, uuid: &ArtifactId) -> Option<Arc<Artifact>> {
        self.entries
            .read()
            .by_id
            .get(uuid)
            .map(|e| Arc::clone(&e.artifact))
    }

    /// The artifact that best covers `filename` for (user, machine), if any.
    pub fn find_matching(
        &self,
        user_id: UserId,
        machine: &Machine,
        filename: &str,
    ) -> Option<Arc<Artifact>> {
        let filename = path::normalize(filename);
        let entries = self.entries.read();
        let best = entries
            .by_id
            .values()
            .filter(|e| e.artifact.belongs_to(user_id, machine) && e.artifact.contains(&filename))
            .max_by_key(|e| match self.config.policy {
                MatchPolicy::MostRecentlyPublished => (0, e.seq),
                MatchPolicy::MostFiles => (e.artifact.indexed_path_hashes.len(), e.seq),
            })?;
        best.touch();
        Some(Arc::clone(&best.artifact))
    }

    /// Matches for a batch of queries, keyed by artifact id.
    pub fn find_all(&self, queries: &[UserMachineFile]) -> BTreeMap<ArtifactId, Artifact> {
        let mut found = BTreeMap::new();
        for q in queries {
            if let Some(artifact) = self.find_matching(q.user_id, &q.machine, &q.filename) {
                found
                    .entry(artifact.uuid)
                    .or_insert_with(|| artifact.as_ref().clone());
            }
        }
        found
    }

    /// Open blob `name` of artifact `uuid` for streaming. Artifacts evicted
    /// less than `retired_grace` ago are still served.
    pub fn open_blob(&self, uuid: &ArtifactId, name: &str) -> Result<std::fs::File, CacheError> {
        {
            let entries = self.entries.read();
            let files = if let Some(entry) = entries.by_id.get(uuid) {
                entry.touch();
                &entry.artifact.files
            } else {
                match entries.retired.get(uuid) {
                    Some(t) if t.retired_at.elapsed() <= self.config.retired_grace => &t.files,
                    _ => return Err(CacheError::UnknownArtifact(*uuid)),
                }
            };
            if !files.iter().any(|f| f == name) {
                return Err(CacheError::UnknownBlob {
                    uuid: *uuid,
                    name: name.to_string(),
                });
            }
        }
        Ok(self.blobs.get_reader(&artifact_key(uuid, name))?)
    }

    pub fn artifacts(&self) -> Vec<Arc<Artifact>> {
        let entries = self.entries.read();
        let mut all: Vec<(u64, Arc<Artifact>)> = entries
            .by_id
            .values()
            .map(|e| (e.seq, Arc::clone(&e.artifact)))
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, a)| a).collect()
    }
}
