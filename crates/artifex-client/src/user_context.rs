// SPDX-License-Identifier: BUSL-1.1
//! # Per-user artifact context
//!
//! A [`UserContext`] holds the loaded artifacts of one (user, machine) and
//! is what consumers query. Lookups never touch the network: a miss (or a
//! dirty hit) schedules a background request, rate limited per file, and
//! returns whatever is available right now.
//!
//! ## Lifecycle of an artifact
//!
//! requested → polling → loaded → (dirty) → idle → released, with failed
//! builds and failed loads parked in a separate errored set. An errored
//! entry answers lookups for its files with the build error and suppresses
//! further requests until a file sync touches those files.
//!
//! ## Locking
//!
//! Three independent locks: the artifact maps (`RwLock`), the per-file
//! request timestamps and the poll set. Lock order is artifacts before
//! poll set. No lock is held across a network call or a loader call.
//!
//! The background task (polling plus inactivity sweep) is spawned at
//! construction and stops when the context is cleaned up or dropped, so
//! [`UserContext::new`] must be called inside a tokio runtime.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use artifex_core::path;
use artifex_core::{Artifact, ArtifactId, BuildErrorKind, Language, LoadedIndex, Registry, UserMachine};

use crate::client::ArtifactService;
use crate::config::UserContextConfig;
use crate::error::NoArtifact;
use crate::getter::ArtifactGetter;

/// Artifacts taking longer than this to arrive are logged as slow.
const SLOW_ARTIFACT: Duration = Duration::from_secs(60);

/// A loaded artifact as handed to consumers.
#[derive(Clone)]
pub struct ArtifactHandle {
    artifact: Arc<Artifact>,
    object: Arc<dyn LoadedIndex>,
    dirty: bool,
}

impl ArtifactHandle {
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn object(&self) -> &Arc<dyn LoadedIndex> {
        &self.object
    }

    /// Whether files it covers changed after it was built.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn downcast_ref<T: LoadedIndex>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for ArtifactHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactHandle")
            .field("uuid", &self.artifact.uuid)
            .field("root", &self.artifact.root)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Summary of one loaded artifact, for debug pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStatus {
    pub uuid: ArtifactId,
    pub root: String,
    pub language: Language,
    pub indexed_paths: usize,
    pub dirty: bool,
    pub loaded_for: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub loaded: usize,
    pub idle: usize,
    pub errored: usize,
    pub polling: usize,
}

struct Access {
    tick: u64,
    at: Instant,
}

struct LoadedArtifact {
    artifact: Arc<Artifact>,
    object: Arc<dyn LoadedIndex>,
    dirty_at: Option<DateTime<Utc>>,
    loaded_tick: u64,
    loaded_at: Instant,
    accessed: Mutex<Access>,
}

impl LoadedArtifact {
    fn is_dirty(&self) -> bool {
        self.dirty_at
            .is_some_and(|at| at > self.artifact.latest_file_update)
    }

    fn touch(&self, tick: u64) {
        let mut accessed = self.accessed.lock();
        accessed.tick = tick;
        accessed.at = Instant::now();
    }

    fn handle(&self) -> ArtifactHandle {
        ArtifactHandle {
            artifact: Arc::clone(&self.artifact),
            object: Arc::clone(&self.object),
            dirty: self.is_dirty(),
        }
    }
}

struct IdleArtifact {
    uuid: ArtifactId,
    object: Arc<dyn LoadedIndex>,
    marked_idle_at: Instant,
}

struct ErroredArtifact {
    artifact: Arc<Artifact>,
    tick: u64,
}

#[derive(Default)]
struct Artifacts {
    loaded: HashMap<ArtifactId, LoadedArtifact>,
    idle: Vec<IdleArtifact>,
    errored: HashMap<ArtifactId, ErroredArtifact>,
    /// Errors invalidated by a file sync. The server keeps answering with
    /// them until a rebuild replaces them.
    retired_errors: HashSet<ArtifactId>,
}

impl Artifacts {
    /// Most recently loaded artifact covering `path`.
    fn best_for(&self, path: &str) -> Option<&LoadedArtifact> {
        self.loaded
            .values()
            .filter(|l| l.artifact.contains(path))
            .max_by_key(|l| l.loaded_tick)
    }

    fn latest_error_for(&self, path: &str) -> Option<&ErroredArtifact> {
        self.errored
            .values()
            .filter(|e| e.artifact.contains(path))
            .max_by_key(|e| e.tick)
    }

    /// Nothing more to wait for on `path`.
    fn is_settled(&self, path: &str) -> bool {
        self.loaded
            .values()
            .any(|l| !l.is_dirty() && l.artifact.contains(path))
            || self.errored.values().any(|e| e.artifact.contains(path))
    }

    fn retire(&mut self, uuid: &ArtifactId, now: Instant) {
        if let Some(loaded) = self.loaded.remove(uuid) {
            self.idle.push(IdleArtifact {
                uuid: *uuid,
                object: loaded.object,
                marked_idle_at: now,
            });
        }
    }

    fn least_recently_accessed(&self) -> Option<ArtifactId> {
        self.loaded
            .iter()
            .min_by_key(|(_, l)| l.accessed.lock().tick)
            .map(|(id, _)| *id)
    }
}

#[derive(Default)]
struct Latency {
    first_request: Option<Instant>,
    first_artifact: Option<Instant>,
}

struct Inner {
    owner: UserMachine,
    service: Arc<dyn ArtifactService>,
    registry: Arc<Registry>,
    config: UserContextConfig,
    runtime: tokio::runtime::Handle,
    cancel: CancellationToken,
    artifacts: RwLock<Artifacts>,
    last_requests: Mutex<HashMap<String, Instant>>,
    /// Files awaiting an artifact, with the time polling started.
    polling: Mutex<HashMap<String, Instant>>,
    last_polled: AtomicUsize,
    ticks: AtomicU64,
    latency: Mutex<Latency>,
}

pub struct UserContext {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UserContext {
    pub fn new(
        owner: UserMachine,
        service: Arc<dyn ArtifactService>,
        registry: Arc<Registry>,
        config: UserContextConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            owner,
            service,
            registry,
            config,
            runtime: tokio::runtime::Handle::current(),
            cancel: CancellationToken::new(),
            artifacts: RwLock::new(Artifacts::default()),
            last_requests: Mutex::new(HashMap::new()),
            polling: Mutex::new(HashMap::new()),
            last_polled: AtomicUsize::new(0),
            ticks: AtomicU64::new(0),
            latency: Mutex::new(Latency::default()),
        });
        let task = inner.runtime.spawn(run(Arc::clone(&inner)));
        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn owner(&self) -> &UserMachine {
        &self.inner.owner
    }

    /// Best loaded artifact covering `path`: the most recently loaded one.
    pub fn artifact_for_file(&self, path: &str) -> Result<ArtifactHandle, NoArtifact> {
        let path = path::normalize(path);
        let tick = self.inner.next_tick();
        let artifacts = self.inner.artifacts.read();
        if let Some(best) = artifacts.best_for(&path) {
            best.touch(tick);
            return Ok(best.handle());
        }
        match artifacts.latest_error_for(&path) {
            Some(errored) => Err(NoArtifact::errored(&errored.artifact)),
            None => Err(NoArtifact::none()),
        }
    }

    /// Like [`artifact_for_file`](Self::artifact_for_file), but a miss or a
    /// dirty hit also schedules a request for `path`, at most once per
    /// request-rate window.
    pub fn request_for_file(&self, path: &str) -> Result<ArtifactHandle, NoArtifact> {
        let path = path::normalize(path);
        let found = self.artifact_for_file(&path);
        let wanted = match &found {
            Ok(handle) => handle.is_dirty(),
            Err(no_artifact) => !no_artifact.is_errored(),
        };
        if wanted && !self.inner.cancel.is_cancelled() && self.inner.should_request(&path) {
            let inner = Arc::clone(&self.inner);
            self.inner.runtime.spawn(async move { inner.make_request(path).await });
        }
        found
    }

    /// Most recently loaded artifact, whatever it covers.
    pub fn any_artifact(&self) -> Option<ArtifactHandle> {
        let tick = self.inner.next_tick();
        let artifacts = self.inner.artifacts.read();
        let newest = artifacts.loaded.values().max_by_key(|l| l.loaded_tick)?;
        newest.touch(tick);
        Some(newest.handle())
    }

    /// Record that `filenames` changed on the file store.
    ///
    /// Loaded artifacts covering any of them turn dirty. Errors covering
    /// them are cleared, and so are all "no files selected" errors.
    pub fn observe_file_sync<I, S>(&self, filenames: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let files: Vec<String> = filenames
            .into_iter()
            .map(|f| path::normalize(f.as_ref()))
            .collect();
        if files.is_empty() {
            return;
        }
        let now = Utc::now();
        let mut artifacts = self.inner.artifacts.write();
        let mut dirtied = 0;
        for loaded in artifacts.loaded.values_mut() {
            if files.iter().any(|f| loaded.artifact.contains(f)) {
                loaded.dirty_at = Some(now);
                dirtied += 1;
            }
        }
        let cleared: Vec<ArtifactId> = artifacts
            .errored
            .iter()
            .filter(|(_, e)| {
                e.artifact.error_kind == Some(BuildErrorKind::NoFilesSelected)
                    || files.iter().any(|f| e.artifact.contains(f))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &cleared {
            artifacts.errored.remove(id);
            artifacts.retired_errors.insert(*id);
        }
        tracing::debug!(
            user_id = %self.inner.owner.user_id,
            machine = %self.inner.owner.machine,
            files = files.len(),
            dirtied,
            cleared = cleared.len(),
            "observed file sync"
        );
    }

    /// Whether a request for `path` is still waiting for an artifact.
    pub fn is_polling(&self, path: &str) -> bool {
        self.inner.polling.lock().contains_key(&path::normalize(path))
    }

    /// Up to `n` loaded artifacts, most recently loaded first.
    pub fn status(&self, n: usize) -> Vec<ArtifactStatus> {
        let now = Instant::now();
        let artifacts = self.inner.artifacts.read();
        let mut loaded: Vec<&LoadedArtifact> = artifacts.loaded.values().collect();
        loaded.sort_by(|a, b| b.loaded_tick.cmp(&a.loaded_tick));
        loaded
            .into_iter()
            .take(n)
            .map(|l| ArtifactStatus {
                uuid: l.artifact.uuid,
                root: l.artifact.root.clone(),
                language: l.artifact.language,
                indexed_paths: l.artifact.indexed_path_hashes.len(),
                dirty: l.is_dirty(),
                loaded_for: now.duration_since(l.loaded_at),
            })
            .collect()
    }

    pub fn stats(&self) -> ContextStats {
        let (loaded, idle, errored) = {
            let artifacts = self.inner.artifacts.read();
            (
                artifacts.loaded.len(),
                artifacts.idle.len(),
                artifacts.errored.len(),
            )
        };
        ContextStats {
            loaded,
            idle,
            errored,
            polling: self.inner.polling.lock().len(),
        }
    }

    /// Stop the background task and release every loaded and idle object.
    pub async fn cleanup(&self) {
        self.inner.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "user context task failed");
            }
        }

        let objects = self.inner.take_objects();

        {
            let latency = self.inner.latency.lock();
            tracing::info!(
                user_id = %self.inner.owner.user_id,
                machine = %self.inner.owner.machine,
                requested = latency.first_request.is_some(),
                received = latency.first_artifact.is_some(),
                released = objects.len(),
                "user context cleaned up"
            );
        }

        if let Err(e) = tokio::task::spawn_blocking(move || release(objects)).await {
            tracing::warn!(error = %e, "releasing artifacts failed");
        }
    }
}

/// Dropping without [`UserContext::cleanup`] still releases every loaded
/// and idle object, on a blocking thread when a runtime is at hand.
impl Drop for UserContext {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
        let objects = self.inner.take_objects();
        if objects.is_empty() {
            return;
        }
        tracing::debug!(
            user_id = %self.inner.owner.user_id,
            machine = %self.inner.owner.machine,
            released = objects.len(),
            "user context dropped without cleanup"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || release(objects));
            }
            Err(_) => release(objects),
        }
    }
}

impl Inner {
    /// Empty the context. Must run after `cancel`, so no load can insert
    /// behind it.
    fn take_objects(&self) -> Vec<Arc<dyn LoadedIndex>> {
        let objects = {
            let mut artifacts = self.artifacts.write();
            let loaded = std::mem::take(&mut artifacts.loaded);
            let idle = std::mem::take(&mut artifacts.idle);
            artifacts.errored.clear();
            loaded
                .into_values()
                .map(|l| l.object)
                .chain(idle.into_iter().map(|i| i.object))
                .collect()
        };
        self.polling.lock().clear();
        objects
    }

    fn next_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Claim the request window for `path`.
    fn should_request(&self, path: &str) -> bool {
        let now = Instant::now();
        let mut last = self.last_requests.lock();
        match last.get(path) {
            Some(at) if now.duration_since(*at) < self.config.request_rate => false,
            _ => {
                last.insert(path.to_string(), now);
                true
            }
        }
    }

    /// Whether a published artifact is a usable answer. A dirty artifact we
    /// already hold and an error retired by a file sync are not.
    fn is_fresh(&self, artifact: &Artifact) -> bool {
        let artifacts = self.artifacts.read();
        if artifacts.retired_errors.contains(&artifact.uuid) {
            return false;
        }
        artifacts
            .loaded
            .get(&artifact.uuid)
            .map_or(true, |loaded| !loaded.is_dirty())
    }

    async fn make_request(self: Arc<Self>, filename: String) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.latency.lock().first_request.get_or_insert_with(Instant::now);

        let query = self.owner.with_file(filename.as_str());
        match self.service.find_artifact(&query).await {
            Ok(Some(artifact)) if self.is_fresh(&artifact) => {
                if !self.accept(artifact).await {
                    // Replaced before its blobs were fetched. The
                    // replacement turns up on a later poll.
                    self.start_polling(filename);
                }
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    user_id = %self.owner.user_id,
                    machine = %self.owner.machine,
                    filename = %filename,
                    error = %e,
                    "find-matching failed"
                );
            }
        }

        self.submit(&filename).await;
        self.start_polling(filename);
    }

    fn start_polling(&self, filename: String) {
        self.polling
            .lock()
            .entry(filename)
            .or_insert_with(Instant::now);
    }

    async fn submit(&self, filename: &str) {
        let query = self.owner.with_file(filename);
        match self.service.request_artifact(&query).await {
            Ok(()) => tracing::debug!(
                user_id = %self.owner.user_id,
                machine = %self.owner.machine,
                filename = %filename,
                "requested artifact"
            ),
            Err(e) => tracing::warn!(
                user_id = %self.owner.user_id,
                machine = %self.owner.machine,
                filename = %filename,
                error = %e,
                "submit-requests failed"
            ),
        }
    }

    async fn poll_once(&self) {
        let files: Vec<String> = self.polling.lock().keys().cloned().collect();
        if self.last_polled.swap(files.len(), Ordering::Relaxed) != files.len() {
            tracing::debug!(
                user_id = %self.owner.user_id,
                machine = %self.owner.machine,
                pending = files.len(),
                "polling for artifacts"
            );
        }
        for filename in files {
            if self.cancel.is_cancelled() {
                return;
            }
            let query = self.owner.with_file(filename.as_str());
            match self.service.find_artifact(&query).await {
                Ok(Some(artifact)) if self.is_fresh(&artifact) => {
                    self.accept(artifact).await;
                }
                Ok(_) => {
                    // A request merged into a build already in progress is
                    // dropped by the server, so ask again once the window
                    // allows it.
                    if self.should_request(&filename) {
                        self.submit(&filename).await;
                    }
                }
                Err(e) => tracing::debug!(
                    user_id = %self.owner.user_id,
                    filename = %filename,
                    error = %e,
                    "poll failed"
                ),
            }
        }
    }

    /// Load (or record the failure of) a fresh published artifact. `false`
    /// when the server stopped serving it before the load finished, which
    /// is no answer at all.
    async fn accept(&self, artifact: Artifact) -> bool {
        let already_loaded = self.artifacts.read().loaded.contains_key(&artifact.uuid);
        let answered = if artifact.is_error() {
            self.record_error(artifact);
            true
        } else if already_loaded {
            true
        } else {
            self.load(artifact).await
        };
        self.settle_polling();
        answered
    }

    async fn load(&self, artifact: Artifact) -> bool {
        let Some(loader) = self.registry.loader(artifact.language) else {
            let message = format!("no loader registered for {}", artifact.language);
            self.record_error(with_error(artifact, message));
            return true;
        };

        let getter = ArtifactGetter::new(artifact.clone(), Arc::clone(&self.service));
        let started = Instant::now();
        match AssertUnwindSafe(loader.load(&getter)).catch_unwind().await {
            Ok(Ok(object)) => {
                tracing::info!(
                    user_id = %self.owner.user_id,
                    machine = %self.owner.machine,
                    artifact = %artifact.uuid,
                    root = %artifact.root,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "loaded artifact"
                );
                self.insert_loaded(artifact, object);
            }
            Ok(Err(e)) if e.is_gone() => {
                tracing::debug!(
                    user_id = %self.owner.user_id,
                    machine = %self.owner.machine,
                    artifact = %artifact.uuid,
                    error = %e,
                    "artifact no longer served, will look again"
                );
                return false;
            }
            Ok(Err(e)) => {
                let message = format!("error loading artifact: {e}");
                self.record_error(with_error(artifact, message));
            }
            Err(payload) => {
                let message = panic_message(payload);
                self.record_error(with_error(artifact, message));
            }
        }
        true
    }

    fn insert_loaded(&self, artifact: Artifact, object: Arc<dyn LoadedIndex>) {
        let tick = self.next_tick();
        let now = Instant::now();
        let artifact = Arc::new(artifact);
        let mut rejected = Vec::new();
        {
            let mut artifacts = self.artifacts.write();
            if self.cancel.is_cancelled() || artifacts.loaded.contains_key(&artifact.uuid) {
                rejected.push(object);
            } else {
                artifacts
                    .errored
                    .retain(|_, e| !artifact.contains(&e.artifact.root));
                let subsumed: Vec<ArtifactId> = artifacts
                    .loaded
                    .values()
                    .filter(|l| artifact.subsumes(&l.artifact))
                    .map(|l| l.artifact.uuid)
                    .collect();
                for uuid in &subsumed {
                    artifacts.retire(uuid, now);
                }
                artifacts.loaded.insert(
                    artifact.uuid,
                    LoadedArtifact {
                        artifact: Arc::clone(&artifact),
                        object,
                        dirty_at: None,
                        loaded_tick: tick,
                        loaded_at: now,
                        accessed: Mutex::new(Access { tick, at: now }),
                    },
                );
                let max_loaded = self.config.max_loaded_artifacts.max(1);
                while artifacts.loaded.len() > max_loaded {
                    let Some(lru) = artifacts.least_recently_accessed() else {
                        break;
                    };
                    tracing::debug!(
                        user_id = %self.owner.user_id,
                        artifact = %lru,
                        "idling least recently accessed artifact"
                    );
                    artifacts.retire(&lru, now);
                }
            }
        }

        if !rejected.is_empty() {
            tracing::debug!(artifact = %artifact.uuid, "releasing duplicate load");
            release(rejected);
            return;
        }

        let mut latency = self.latency.lock();
        if latency.first_artifact.is_none() {
            latency.first_artifact = Some(now);
            if let Some(first_request) = latency.first_request {
                tracing::info!(
                    user_id = %self.owner.user_id,
                    machine = %self.owner.machine,
                    elapsed_ms = now.duration_since(first_request).as_millis() as u64,
                    "received first artifact"
                );
            }
        }
    }

    fn record_error(&self, artifact: Artifact) {
        tracing::warn!(
            user_id = %self.owner.user_id,
            machine = %self.owner.machine,
            artifact = %artifact.uuid,
            root = %artifact.root,
            kind = ?artifact.error_kind,
            error = %artifact.error,
            "artifact errored"
        );
        let tick = self.next_tick();
        self.artifacts.write().errored.insert(
            artifact.uuid,
            ErroredArtifact {
                artifact: Arc::new(artifact),
                tick,
            },
        );
    }

    /// Stop polling files that now have an answer.
    fn settle_polling(&self) {
        let now = Instant::now();
        let artifacts = self.artifacts.read();
        let mut polling = self.polling.lock();
        polling.retain(|filename, started| {
            if !artifacts.is_settled(filename) {
                return true;
            }
            let waited = now.duration_since(*started);
            if waited > SLOW_ARTIFACT {
                tracing::warn!(
                    user_id = %self.owner.user_id,
                    machine = %self.owner.machine,
                    filename = %filename,
                    waited_secs = waited.as_secs(),
                    "artifact took over a minute to arrive"
                );
            }
            false
        });
    }

    /// Idle inactive artifacts and release idle ones past their grace.
    fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<Arc<dyn LoadedIndex>> = {
            let mut artifacts = self.artifacts.write();
            let inactive: Vec<ArtifactId> = artifacts
                .loaded
                .iter()
                .filter(|(_, l)| now.duration_since(l.accessed.lock().at) >= self.config.max_inactive)
                .map(|(id, _)| *id)
                .collect();
            for uuid in &inactive {
                tracing::debug!(user_id = %self.owner.user_id, artifact = %uuid, "idling inactive artifact");
                artifacts.retire(uuid, now);
            }

            let (expired, kept): (Vec<IdleArtifact>, Vec<IdleArtifact>) = std::mem::take(&mut artifacts.idle)
                .into_iter()
                .partition(|i| now.duration_since(i.marked_idle_at) >= self.config.idle_grace);
            artifacts.idle = kept;
            expired
                .into_iter()
                .map(|i| {
                    tracing::debug!(user_id = %self.owner.user_id, artifact = %i.uuid, "releasing idle artifact");
                    i.object
                })
                .collect()
        };
        self.last_requests
            .lock()
            .retain(|_, at| now.duration_since(*at) < self.config.request_rate);
        release(expired);
    }
}

async fn run(inner: Arc<Inner>) {
    let mut poll = tokio::time::interval(inner.config.polling_rate);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut sweep = tokio::time::interval(inner.config.cleanup_interval);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            _ = poll.tick() => inner.poll_once().await,
            _ = sweep.tick() => inner.sweep(),
        }
    }
}

fn release(objects: Vec<Arc<dyn LoadedIndex>>) {
    for object in objects {
        if let Err(e) = object.cleanup() {
            tracing::warn!(error = %e, "artifact cleanup failed");
        }
    }
}

/// The artifact with a client-side load failure recorded on it.
fn with_error(mut artifact: Artifact, message: String) -> Artifact {
    artifact.error = message;
    artifact.error_kind = None;
    artifact
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("loader panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("loader panicked: {s}")
    } else {
        "loader panicked".to_string()
    }
}
