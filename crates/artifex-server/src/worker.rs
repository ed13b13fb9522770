// SPDX-License-Identifier: BUSL-1.1
//! # Build worker
//!
//! Each iteration runs SELECT → LIST-FILES → DECIDE → BUILD → PUBLISH and
//! always ends with [`RequestQueue::completed`]. Several loops share one
//! queue; none of them holds a lock across the listing or the build.
//!
//! The builder runs on a blocking thread under a wall-clock deadline. Every
//! failure becomes an error-bearing artifact for the request's file of
//! interest, so the client gets a definitive answer. That includes a
//! failed file listing and a fault outside the builder, which
//! `catch_unwind` contains before the loop carries on with the next
//! request.

use std::any::Any;
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use artifex_blobcache::{BlobCache, BlobCacheError, BlobWriter};
use artifex_core::path::indexed_path_hashes;
use artifex_core::{
    artifact_key, latest_update, Artifact, ArtifactId, BlobSink, BuildContext, BuildError,
    BuilderParams, BuilderResult, File, FileGetter, FileLister, Language, Putter, Registry,
};

use crate::artifact_cache::ArtifactCache;
use crate::middleware::metrics::{BuildOutcomeLabel, ServerMetrics};
use crate::queue::{RequestQueue, SelectedRequest};

#[derive(Debug, Clone)]
pub struct BuildWorkerConfig {
    /// Wall-clock limit for one builder invocation.
    pub deadline: Duration,
    /// Number of concurrent worker loops.
    pub concurrency: usize,
    /// How long an idle loop sleeps before re-checking the queue when no
    /// submission wakes it.
    pub idle_interval: Duration,
}

impl Default for BuildWorkerConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            concurrency: 4,
            idle_interval: Duration::from_secs(1),
        }
    }
}

/// Result of one worker iteration.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// An existing artifact was already up to date.
    Skipped(Arc<Artifact>),
    Built(Arc<Artifact>),
    /// An error-bearing artifact was published.
    Failed(Arc<Artifact>),
}

impl Outcome {
    pub fn artifact(&self) -> &Arc<Artifact> {
        match self {
            Self::Skipped(a) | Self::Built(a) | Self::Failed(a) => a,
        }
    }
}

pub struct BuildWorker {
    queue: Arc<RequestQueue>,
    cache: Arc<ArtifactCache>,
    lister: Arc<dyn FileLister>,
    file_getter: Arc<dyn FileGetter>,
    registry: Arc<Registry>,
    metrics: ServerMetrics,
    config: BuildWorkerConfig,
}

impl std::fmt::Debug for BuildWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildWorker")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Update time recorded when the listing never produced one. Any real file
/// is newer, so the next request for the file rebuilds.
const UNKNOWN_UPDATE: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

impl BuildWorker {
    pub fn new(
        queue: Arc<RequestQueue>,
        cache: Arc<ArtifactCache>,
        lister: Arc<dyn FileLister>,
        file_getter: Arc<dyn FileGetter>,
        registry: Arc<Registry>,
        metrics: ServerMetrics,
        config: BuildWorkerConfig,
    ) -> Self {
        Self {
            queue,
            cache,
            lister,
            file_getter,
            registry,
            metrics,
            config,
        }
    }

    /// Start `concurrency` worker loops. They exit once `cancel` fires.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.config.concurrency.max(1))
            .map(|index| {
                let worker = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(index, cancel).await })
            })
            .collect()
    }

    async fn run(&self, index: usize, cancel: CancellationToken) {
        tracing::info!(worker = index, "build worker started");
        while !cancel.is_cancelled() {
            if self.process_next().await.is_some() {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.notified() => {}
                _ = tokio::time::sleep(self.config.idle_interval) => {}
            }
        }
        tracing::info!(worker = index, "build worker stopped");
    }

    /// Claim and process one request. `None` when the queue has nothing
    /// to select.
    pub async fn process_next(&self) -> Option<Outcome> {
        let request = self.queue.next()?;
        let outcome = match AssertUnwindSafe(self.process(&request)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload);
                tracing::error!(
                    user_id = %request.owner.user_id,
                    machine = %request.owner.machine,
                    filename = %request.filename,
                    panic = %message,
                    "build iteration panicked"
                );
                self.fail(&request, UNKNOWN_UPDATE, BuildError::Aborted(message))
            }
        };
        self.queue.completed(&request.owner);
        Some(outcome)
    }

    /// LIST-FILES → DECIDE → BUILD → PUBLISH for a claimed request.
    pub async fn process(&self, request: &SelectedRequest) -> Outcome {
        let owner = &request.owner;
        let files = match self.lister.list(owner.user_id, &owner.machine).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(
                    user_id = %owner.user_id,
                    machine = %owner.machine,
                    filename = %request.filename,
                    error = %e,
                    "file listing failed"
                );
                return self.fail(request, UNKNOWN_UPDATE, BuildError::Unlisted(e.to_string()));
            }
        };
        let latest = latest_update(&files);

        if let Some(existing) =
            self.cache
                .find_matching(owner.user_id, &owner.machine, &request.filename)
        {
            if existing.latest_file_update >= latest {
                tracing::debug!(
                    user_id = %owner.user_id,
                    machine = %owner.machine,
                    filename = %request.filename,
                    artifact = %existing.uuid,
                    "artifact up to date, skipping build"
                );
                self.metrics.record_build(BuildOutcomeLabel::Skipped, None);
                return Outcome::Skipped(existing);
            }
        }

        let uuid = ArtifactId::new();
        let language = Language::from_path(&request.filename);
        let start = Instant::now();
        let built = self.build(uuid, request, language, files).await;
        let elapsed = start.elapsed();
        self.metrics.observe_build_duration(elapsed.as_secs_f64());

        match built {
            Ok((result, blobs)) => {
                if !result.missing_hashes.is_empty() {
                    tracing::warn!(
                        user_id = %owner.user_id,
                        machine = %owner.machine,
                        artifact = %uuid,
                        missing = result.missing_hashes.len(),
                        "builder could not read some file contents"
                    );
                }
                let artifact = Artifact {
                    uuid,
                    user_id: owner.user_id,
                    machine: owner.machine.clone(),
                    root: result.root,
                    language,
                    files: blobs,
                    indexed_path_hashes: indexed_path_hashes(&result.files),
                    latest_file_update: latest,
                    error: String::new(),
                    error_kind: None,
                };
                tracing::info!(
                    user_id = %owner.user_id,
                    machine = %owner.machine,
                    artifact = %uuid,
                    root = %artifact.root,
                    files = result.files.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "published artifact"
                );
                self.metrics.record_build(BuildOutcomeLabel::Built, None);
                Outcome::Built(self.publish(artifact))
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %owner.user_id,
                    machine = %owner.machine,
                    filename = %request.filename,
                    artifact = %uuid,
                    kind = %e.kind(),
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "build failed, publishing error artifact"
                );
                self.fail_as(uuid, request, latest, e)
            }
        }
    }

    fn fail(
        &self,
        request: &SelectedRequest,
        latest: DateTime<Utc>,
        err: BuildError,
    ) -> Outcome {
        self.fail_as(ArtifactId::new(), request, latest, err)
    }

    /// Publish `err` as the answer for the request's file of interest.
    fn fail_as(
        &self,
        uuid: ArtifactId,
        request: &SelectedRequest,
        latest: DateTime<Utc>,
        err: BuildError,
    ) -> Outcome {
        self.metrics
            .record_build(BuildOutcomeLabel::Failed, Some(err.kind()));
        let artifact = Artifact::failed(uuid, &request.owner, &request.filename, latest, &err);
        Outcome::Failed(self.publish(artifact))
    }

    fn publish(&self, artifact: Artifact) -> Arc<Artifact> {
        let published = Arc::new(artifact.clone());
        self.cache.publish(artifact);
        published
    }

    async fn build(
        &self,
        uuid: ArtifactId,
        request: &SelectedRequest,
        language: Language,
        files: Vec<File>,
    ) -> Result<(BuilderResult, Vec<String>), BuildError> {
        let builder = self
            .registry
            .builder(language)
            .ok_or(BuildError::NoBuilder(language))?;
        let putter = Arc::new(BlobPutter::new(self.cache.blobs().clone(), uuid));
        let params = BuilderParams {
            uuid,
            owner: request.owner.clone(),
            filename: request.filename.clone(),
            language,
            files,
            file_getter: Arc::clone(&self.file_getter),
            putter: putter.clone(),
        };

        let ctx = BuildContext::with_timeout(self.config.deadline);
        let handle = tokio::task::spawn_blocking({
            let ctx = ctx.clone();
            move || builder.build(&ctx, &params)
        });
        match tokio::time::timeout(self.config.deadline, handle).await {
            Err(_) => {
                ctx.cancel();
                Err(BuildError::DeadlineExceeded)
            }
            Ok(Err(join)) if join.is_panic() => {
                Err(BuildError::Panicked(panic_message(join.into_panic())))
            }
            Ok(Err(join)) => Err(BuildError::Failed(join.to_string())),
            Ok(Ok(result)) => result.map(|r| (r, putter.names())),
        }
    }
}

fn into_io(err: BlobCacheError) -> io::Error {
    match err {
        BlobCacheError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

/// [`Putter`] writing `{uuid}-{name}` blobs into the blob cache and
/// recording the names written.
pub struct BlobPutter {
    blobs: BlobCache,
    uuid: ArtifactId,
    names: Arc<Mutex<BTreeSet<String>>>,
}

impl BlobPutter {
    pub fn new(blobs: BlobCache, uuid: ArtifactId) -> Self {
        Self {
            blobs,
            uuid,
            names: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Names of the blobs committed so far, sorted.
    pub fn names(&self) -> Vec<String> {
        self.names.lock().iter().cloned().collect()
    }
}

impl Putter for BlobPutter {
    fn put(&self, name: &str, data: &[u8]) -> io::Result<()> {
        self.blobs
            .put(&artifact_key(&self.uuid, name), data)
            .map_err(into_io)?;
        self.names.lock().insert(name.to_string());
        Ok(())
    }

    fn put_writer(&self, name: &str) -> io::Result<Box<dyn BlobSink>> {
        let writer = self
            .blobs
            .put_writer(&artifact_key(&self.uuid, name))
            .map_err(into_io)?;
        Ok(Box::new(PutterSink {
            writer,
            name: name.to_string(),
            names: Arc::clone(&self.names),
        }))
    }
}

struct PutterSink {
    writer: BlobWriter,
    name: String,
    names: Arc<Mutex<BTreeSet<String>>>,
}

impl Write for PutterSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl BlobSink for PutterSink {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let sink = *self;
        sink.writer.commit().map_err(into_io)?;
        sink.names.lock().insert(sink.name);
        Ok(())
    }
}
