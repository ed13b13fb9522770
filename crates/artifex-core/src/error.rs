// SPDX-License-Identifier: BUSL-1.1
//! # Error Types: Build, Load and Listing Failures
//!
//! Build failures are data, not control flow: the worker converts every
//! [`BuildError`] into an error-bearing artifact whose `ErrorKind` carries
//! the [`BuildErrorKind`] classification, so that consumers can tell a
//! timeout apart from a logic error without parsing messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::language::Language;

/// Classification recorded on error-bearing artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildErrorKind {
    /// The build exceeded its wall-clock deadline.
    DeadlineExceeded,
    /// The builder returned an error.
    BuildFailed,
    /// The builder panicked; the panic was contained by the worker.
    Panicked,
    /// No file of the request's language was available. Usually a race with
    /// file upload; cleared by the next file-sync observation.
    NoFilesSelected,
    /// No builder is registered for the request's language.
    NoBuilder,
    /// The authoritative file listing could not be read.
    ListingFailed,
    /// The iteration faulted outside the builder.
    Aborted,
}

impl BuildErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::BuildFailed => "build_failed",
            Self::Panicked => "panicked",
            Self::NoFilesSelected => "no_files_selected",
            Self::NoBuilder => "no_builder",
            Self::ListingFailed => "listing_failed",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for BuildErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned across the builder boundary.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("no files selected")]
    NoFilesSelected,

    #[error("no builder registered for {0}")]
    NoBuilder(Language),

    #[error("builder panicked: {0}")]
    Panicked(String),

    #[error("build failed: {0}")]
    Failed(String),

    #[error("blob write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("file listing failed: {0}")]
    Unlisted(String),

    #[error("build iteration aborted: {0}")]
    Aborted(String),
}

impl BuildError {
    pub fn kind(&self) -> BuildErrorKind {
        match self {
            Self::DeadlineExceeded => BuildErrorKind::DeadlineExceeded,
            Self::NoFilesSelected => BuildErrorKind::NoFilesSelected,
            Self::NoBuilder(_) => BuildErrorKind::NoBuilder,
            Self::Panicked(_) => BuildErrorKind::Panicked,
            Self::Failed(_) | Self::Io(_) => BuildErrorKind::BuildFailed,
            Self::Unlisted(_) => BuildErrorKind::ListingFailed,
            Self::Aborted(_) => BuildErrorKind::Aborted,
        }
    }
}

/// Error produced while turning artifact blobs into a loaded object.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("artifact has no blob named {0}")]
    UnknownBlob(String),

    #[error("fetching blob {name}: {reason}")]
    Fetch { name: String, reason: String },

    /// The server no longer serves the blob, usually because a rebuild
    /// replaced the artifact. Not a property of the artifact itself.
    #[error("blob {0} is no longer served")]
    Gone(String),

    #[error("decoding blob {name}: {reason}")]
    Decode { name: String, reason: String },
}

impl LoadError {
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone(_))
    }
}

/// Error from the authoritative file listing collaborator.
#[derive(Error, Debug)]
pub enum ListError {
    #[error("file listing unavailable: {0}")]
    Unavailable(String),

    #[error("io error listing files: {0}")]
    Io(#[from] std::io::Error),
}
