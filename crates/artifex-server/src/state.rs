// SPDX-License-Identifier: BUSL-1.1
//! Shared application state for the HTTP handlers.
//!
//! Cheaply cloneable via `Arc`; all clones share the same queue and cache.

use std::sync::Arc;

use crate::artifact_cache::ArtifactCache;
use crate::queue::RequestQueue;

#[derive(Debug, Clone)]
pub struct AppState {
    pub queue: Arc<RequestQueue>,
    pub cache: Arc<ArtifactCache>,
}

impl AppState {
    pub fn new(queue: Arc<RequestQueue>, cache: Arc<ArtifactCache>) -> Self {
        Self { queue, cache }
    }
}
