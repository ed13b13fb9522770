// SPDX-License-Identifier: BUSL-1.1
//! # Worker group
//!
//! Routes a user to one of N build-server endpoints with
//! `user_id mod N`. The endpoint list is swapped atomically under a lock,
//! either once (standalone) or periodically from a [`MembershipSource`].
//!
//! Routing never blocks or retries: with no endpoints every lookup fails
//! with [`ClientError::NoEndpoints`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use artifex_core::UserId;

use crate::error::ClientError;

/// Source of the current build-server endpoints.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn endpoints(&self) -> Result<Vec<Url>, ClientError>;
}

/// A fixed endpoint list.
#[derive(Debug, Clone)]
pub struct StaticMembership {
    endpoints: Vec<Url>,
}

impl StaticMembership {
    pub fn new(endpoints: Vec<Url>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl MembershipSource for StaticMembership {
    async fn endpoints(&self) -> Result<Vec<Url>, ClientError> {
        Ok(self.endpoints.clone())
    }
}

#[derive(Debug, Default)]
pub struct WorkerGroup {
    endpoints: RwLock<Vec<Url>>,
}

impl WorkerGroup {
    pub fn new(endpoints: Vec<Url>) -> Self {
        Self {
            endpoints: RwLock::new(canonical(endpoints)),
        }
    }

    /// Single-endpoint mode.
    pub fn standalone(endpoint: Url) -> Self {
        Self::new(vec![endpoint])
    }

    /// Single endpoint at `http://127.0.0.1:{port}`.
    pub fn localhost(port: u16) -> Result<Self, ClientError> {
        let raw = format!("http://127.0.0.1:{port}");
        let url = Url::parse(&raw).map_err(|_| ClientError::InvalidUrl(raw))?;
        Ok(Self::standalone(url))
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    pub fn endpoints(&self) -> Vec<Url> {
        self.endpoints.read().clone()
    }

    /// Index of the endpoint serving `user_id`.
    pub fn shard(&self, user_id: UserId) -> Result<usize, ClientError> {
        shard_of(user_id, self.endpoints.read().len())
    }

    /// URL of `path` on the endpoint at `index`.
    pub fn url(&self, index: usize, path: &str) -> Result<Url, ClientError> {
        let endpoints = self.endpoints.read();
        let base = endpoints.get(index).ok_or(ClientError::UnknownShard(index))?;
        join(base, path)
    }

    /// URL of `path` on the endpoint serving `user_id`.
    ///
    /// Shard and URL are resolved against the same snapshot of the list.
    pub fn url_for(&self, user_id: UserId, path: &str) -> Result<(usize, Url), ClientError> {
        let endpoints = self.endpoints.read();
        let index = shard_of(user_id, endpoints.len())?;
        Ok((index, join(&endpoints[index], path)?))
    }

    /// Swap in a new endpoint list. Returns whether it differed.
    pub fn replace(&self, endpoints: Vec<Url>) -> bool {
        let endpoints = canonical(endpoints);
        let mut current = self.endpoints.write();
        if *current == endpoints {
            return false;
        }
        *current = endpoints;
        true
    }

    /// Refresh the endpoint list from `source` every `interval` until
    /// `cancel` fires. A failing source keeps the previous list.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        source: Arc<dyn MembershipSource>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let group = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match source.endpoints().await {
                    Ok(endpoints) => {
                        if group.replace(endpoints) {
                            tracing::info!(endpoints = group.len(), "build worker membership changed");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "membership refresh failed"),
                }
            }
        })
    }
}

fn shard_of(user_id: UserId, len: usize) -> Result<usize, ClientError> {
    if len == 0 {
        return Err(ClientError::NoEndpoints);
    }
    Ok(user_id.as_i64().rem_euclid(len as i64) as usize)
}

fn canonical(mut endpoints: Vec<Url>) -> Vec<Url> {
    endpoints.sort();
    endpoints.dedup();
    endpoints
}

fn join(base: &Url, path: &str) -> Result<Url, ClientError> {
    let raw = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&raw).map_err(|_| ClientError::InvalidUrl(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(raw: &[&str]) -> Vec<Url> {
        raw.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    #[test]
    fn shard_is_user_id_mod_len() {
        let group = WorkerGroup::new(urls(&["http://a:1", "http://b:1", "http://c:1"]));
        assert_eq!(group.shard(UserId::new(0)).unwrap(), 0);
        assert_eq!(group.shard(UserId::new(4)).unwrap(), 1);
        assert_eq!(group.shard(UserId::new(8)).unwrap(), 2);
        assert_eq!(group.shard(UserId::new(-1)).unwrap(), 2);
    }

    #[test]
    fn empty_group_fails_fast() {
        let group = WorkerGroup::default();
        assert!(matches!(group.shard(UserId::new(1)), Err(ClientError::NoEndpoints)));
        assert!(matches!(
            group.url_for(UserId::new(1), "/queue"),
            Err(ClientError::NoEndpoints)
        ));
        assert!(matches!(group.url(0, "/queue"), Err(ClientError::UnknownShard(0))));
    }

    #[test]
    fn replace_sorts_and_dedups() {
        let group = WorkerGroup::new(urls(&["http://b:1", "http://a:1"]));
        assert!(!group.replace(urls(&["http://a:1", "http://b:1", "http://a:1"])));
        assert!(group.replace(urls(&["http://c:1"])));
        assert_eq!(group.endpoints(), urls(&["http://c:1"]));
    }

    #[test]
    fn url_keeps_base_path_prefix() {
        let group = WorkerGroup::new(urls(&["http://host:8070/builds/"]));
        let (index, url) = group.url_for(UserId::new(9), "/artifacts/find-matching").unwrap();
        assert_eq!(index, 0);
        assert_eq!(url.as_str(), "http://host:8070/builds/artifacts/find-matching");
    }

    #[test]
    fn localhost_mode_has_one_endpoint() {
        let group = WorkerGroup::localhost(8070).unwrap();
        assert_eq!(group.len(), 1);
        assert_eq!(
            group.url(0, "/queue").unwrap().as_str(),
            "http://127.0.0.1:8070/queue"
        );
    }

    struct FlakyMembership {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl MembershipSource for FlakyMembership {
        async fn endpoints(&self) -> Result<Vec<Url>, ClientError> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                Ok(urls(&["http://a:1", "http://b:1"]))
            } else {
                Err(ClientError::Membership("discovery down".into()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_applies_updates_and_keeps_list_on_failure() {
        let group = Arc::new(WorkerGroup::default());
        let cancel = CancellationToken::new();
        let source = Arc::new(FlakyMembership {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let handle = group.spawn_refresh(source.clone(), Duration::from_secs(10), cancel.clone());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(group.len(), 2);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(source.calls.load(std::sync::atomic::Ordering::SeqCst) >= 3);
        assert_eq!(group.len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn static_membership_returns_its_list() {
        let source = StaticMembership::new(urls(&["http://a:1"]));
        assert_eq!(source.endpoints().await.unwrap(), urls(&["http://a:1"]));
    }
}
