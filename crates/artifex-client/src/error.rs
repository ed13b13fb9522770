// SPDX-License-Identifier: BUSL-1.1
//! Client error types.

use artifex_core::{Artifact, BuildErrorKind};

/// Errors from calls to the build servers.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The worker group has no endpoints right now.
    #[error("no build worker endpoints available")]
    NoEndpoints,

    #[error("no build worker endpoint at index {0}")]
    UnknownShard(usize),

    #[error("invalid endpoint URL {0}")]
    InvalidUrl(String),

    /// HTTP transport error.
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        source: reqwest::Error,
    },

    /// The server answered 404.
    #[error("{endpoint} not found")]
    NotFound { endpoint: String },

    /// Any other non-2xx status.
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("failed to deserialize response from {endpoint}: {source}")]
    Deserialization {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("membership source failed: {0}")]
    Membership(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Returned by artifact lookups when nothing usable covers a path.
///
/// When the covering build failed, the message is the build error
/// verbatim and [`NoArtifact::kind`] carries its classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct NoArtifact {
    reason: String,
    kind: Option<BuildErrorKind>,
    errored: bool,
}

impl NoArtifact {
    pub fn none() -> Self {
        Self {
            reason: "no artifact".to_string(),
            kind: None,
            errored: false,
        }
    }

    pub fn errored(artifact: &Artifact) -> Self {
        Self {
            reason: artifact.error.clone(),
            kind: artifact.error_kind,
            errored: true,
        }
    }

    /// Whether a failed build (or load) is the reason.
    pub fn is_errored(&self) -> bool {
        self.errored
    }

    pub fn kind(&self) -> Option<BuildErrorKind> {
        self.kind
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}
