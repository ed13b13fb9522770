// SPDX-License-Identifier: BUSL-1.1
//! Blob access for loaders, backed by the build service.

use std::sync::Arc;

use async_trait::async_trait;

use artifex_core::{Artifact, Getter, LoadError};

use crate::client::ArtifactService;

/// [`Getter`] over one published artifact's blobs.
pub struct ArtifactGetter {
    artifact: Artifact,
    service: Arc<dyn ArtifactService>,
}

impl ArtifactGetter {
    pub fn new(artifact: Artifact, service: Arc<dyn ArtifactService>) -> Self {
        Self { artifact, service }
    }
}

#[async_trait]
impl Getter for ArtifactGetter {
    fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, LoadError> {
        if !self.artifact.files.iter().any(|f| f == name) {
            return Err(LoadError::UnknownBlob(name.to_string()));
        }
        self.service
            .fetch_blob(&self.artifact, name)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    LoadError::Gone(name.to_string())
                } else {
                    LoadError::Fetch {
                        name: name.to_string(),
                        reason: e.to_string(),
                    }
                }
            })
    }
}
