// SPDX-License-Identifier: BUSL-1.1
//! # artifex-client: Consumer side of the Artifex build service
//!
//! - [`WorkerGroup`] routes each user to a build server (`user_id mod N`)
//!   and refreshes the endpoint list from a [`MembershipSource`].
//! - [`WorkerClient`] speaks the HTTP protocol; blob GETs are retried with
//!   backoff per [`BlobRetry`], POSTs are not.
//! - [`UserContext`] keeps the loaded artifacts of one (user, machine) and
//!   answers lookups without blocking on the network.

pub mod client;
pub mod config;
pub mod error;
pub mod getter;
pub mod group;
mod retry;
pub mod user_context;

pub use client::{ArtifactService, WorkerClient};
pub use config::{UserContextConfig, WorkerClientConfig};
pub use error::{ClientError, NoArtifact};
pub use getter::ArtifactGetter;
pub use group::{MembershipSource, StaticMembership, WorkerGroup};
pub use retry::BlobRetry;
pub use user_context::{ArtifactHandle, ArtifactStatus, ContextStats, UserContext};
