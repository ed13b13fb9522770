// SPDX-License-Identifier: BUSL-1.1
//! # Artifact: the unit of publication
//!
//! An [`Artifact`] is immutable once published. Cache bookkeeping
//! (publication and access times) lives in the server's cache entries, not
//! on the artifact itself, so the wire form is exactly what the worker
//! produced.
//!
//! ## Subsumption
//!
//! Artifact A subsumes artifact B when both belong to the same
//! (user, machine) and index exactly the same path set. Publishing A evicts
//! B from the cache.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, BuildErrorKind};
use crate::ids::{ArtifactId, Machine, UserId, UserMachine};
use crate::language::Language;
use crate::path::{self, PathHash};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "UUID")]
    pub uuid: ArtifactId,
    #[serde(rename = "UserID")]
    pub user_id: UserId,
    #[serde(rename = "Machine")]
    pub machine: Machine,
    /// File or directory the build was anchored at.
    #[serde(rename = "Root")]
    pub root: String,
    #[serde(rename = "Language")]
    pub language: Language,
    /// Names of the blobs written by the builder.
    #[serde(rename = "Files", default)]
    pub files: Vec<String>,
    #[serde(rename = "IndexedPathHashes", default)]
    pub indexed_path_hashes: BTreeSet<PathHash>,
    #[serde(rename = "LatestFileUpdate")]
    pub latest_file_update: DateTime<Utc>,
    /// Empty on success.
    #[serde(rename = "Error", default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(rename = "ErrorKind", default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<BuildErrorKind>,
}

impl Artifact {
    /// Error-bearing artifact for a failed build of `filename`.
    ///
    /// Only the filename itself is indexed: the negative answer applies to
    /// the file that triggered the build, not to its whole directory.
    pub fn failed(
        uuid: ArtifactId,
        owner: &UserMachine,
        filename: &str,
        latest_file_update: DateTime<Utc>,
        err: &BuildError,
    ) -> Self {
        let filename = path::normalize(filename);
        let mut indexed_path_hashes = BTreeSet::new();
        indexed_path_hashes.insert(PathHash::of(&filename));
        Self {
            uuid,
            user_id: owner.user_id,
            machine: owner.machine.clone(),
            language: Language::from_path(&filename),
            root: filename,
            files: Vec::new(),
            indexed_path_hashes,
            latest_file_update,
            error: err.to_string(),
            error_kind: Some(err.kind()),
        }
    }

    pub fn owner(&self) -> UserMachine {
        UserMachine::new(self.user_id, self.machine.clone())
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        self.error_kind == Some(BuildErrorKind::DeadlineExceeded)
    }

    /// Whether this artifact can answer queries for `path` (or one of its
    /// ancestor directories).
    pub fn contains(&self, path: &str) -> bool {
        path::covers(&self.indexed_path_hashes, path)
    }

    pub fn belongs_to(&self, user_id: UserId, machine: &Machine) -> bool {
        self.user_id == user_id && &self.machine == machine
    }

    /// Whether `self` makes `other` redundant.
    pub fn subsumes(&self, other: &Artifact) -> bool {
        self.uuid != other.uuid
            && other.belongs_to(self.user_id, &self.machine)
            && self.indexed_path_hashes == other.indexed_path_hashes
    }
}

/// Blob store key for an artifact blob: `{uuid}-{name}`.
pub fn artifact_key(uuid: &ArtifactId, name: &str) -> String {
    format!("{uuid}-{name}")
}
