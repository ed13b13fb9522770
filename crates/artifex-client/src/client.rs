// SPDX-License-Identifier: BUSL-1.1
//! # HTTP client for the build servers
//!
//! [`WorkerClient`] speaks the wire protocol against the shard that owns
//! each user. Batched calls are split per shard and the answers merged.
//!
//! [`ArtifactService`] is the seam the [`UserContext`](crate::UserContext)
//! depends on, so the context can be driven by a fake in tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use artifex_core::{Artifact, ArtifactId, UserMachineFile};

use crate::config::WorkerClientConfig;
use crate::error::ClientError;
use crate::group::WorkerGroup;
use crate::retry::BlobRetry;

/// The three calls a user context makes against the build service.
#[async_trait]
pub trait ArtifactService: Send + Sync {
    /// Best published artifact covering the query, if any.
    async fn find_artifact(&self, query: &UserMachineFile) -> Result<Option<Artifact>, ClientError>;

    /// Ask for a build covering the query.
    async fn request_artifact(&self, query: &UserMachineFile) -> Result<(), ClientError>;

    /// Bytes of one blob of a published artifact.
    async fn fetch_blob(&self, artifact: &Artifact, name: &str) -> Result<Vec<u8>, ClientError>;
}

#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    group: Arc<WorkerGroup>,
    blob_retry: BlobRetry,
}

impl WorkerClient {
    pub fn new(group: Arc<WorkerGroup>, config: &WorkerClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Http {
                endpoint: "client-init".into(),
                source: e,
            })?;
        Ok(Self {
            http,
            group,
            blob_retry: config.blob_retry,
        })
    }

    pub fn group(&self) -> &Arc<WorkerGroup> {
        &self.group
    }

    /// `POST /artifacts/submit-requests` to every shard involved.
    pub async fn submit_requests(&self, requests: &[UserMachineFile]) -> Result<(), ClientError> {
        for (url, batch) in self.by_shard(requests, "/artifacts/submit-requests")? {
            let endpoint = url.to_string();
            let resp = self
                .http
                .post(url)
                .json(&batch)
                .send()
                .await
                .map_err(|e| ClientError::Http {
                    endpoint: endpoint.clone(),
                    source: e,
                })?;
            check_status(resp, &endpoint).await?;
        }
        Ok(())
    }

    /// `POST /artifacts/find-matching` to every shard involved, merging the
    /// per-shard answers.
    pub async fn find_matching(
        &self,
        queries: &[UserMachineFile],
    ) -> Result<BTreeMap<ArtifactId, Artifact>, ClientError> {
        let mut found = BTreeMap::new();
        for (url, batch) in self.by_shard(queries, "/artifacts/find-matching")? {
            let endpoint = url.to_string();
            let resp = self
                .http
                .post(url)
                .json(&batch)
                .send()
                .await
                .map_err(|e| ClientError::Http {
                    endpoint: endpoint.clone(),
                    source: e,
                })?;
            let resp = check_status(resp, &endpoint).await?;
            let matches: BTreeMap<ArtifactId, Artifact> =
                resp.json()
                    .await
                    .map_err(|e| ClientError::Deserialization {
                        endpoint: endpoint.clone(),
                        source: e,
                    })?;
            found.extend(matches);
        }
        Ok(found)
    }

    /// `GET /artifacts/{uuid}/{name}`. Transient failures are retried; a
    /// 404 comes back at once as [`ClientError::NotFound`].
    pub async fn get_blob(&self, artifact: &Artifact, name: &str) -> Result<Vec<u8>, ClientError> {
        let (_, url) = self
            .group
            .url_for(artifact.user_id, &format!("/artifacts/{}/{}", artifact.uuid, name))?;
        let endpoint = url.to_string();
        let http = &self.http;
        let (url, endpoint) = (&url, endpoint.as_str());
        self.blob_retry
            .run(endpoint, move || async move {
                let transport = |e: reqwest::Error| ClientError::Http {
                    endpoint: endpoint.to_string(),
                    source: e,
                };
                let resp = http.get(url.clone()).send().await.map_err(transport)?;
                let resp = check_status(resp, endpoint).await?;
                let bytes = resp.bytes().await.map_err(transport)?;
                Ok::<_, ClientError>(bytes.to_vec())
            })
            .await
    }

    fn by_shard(
        &self,
        items: &[UserMachineFile],
        path: &str,
    ) -> Result<Vec<(url::Url, Vec<UserMachineFile>)>, ClientError> {
        let mut shards: BTreeMap<usize, (url::Url, Vec<UserMachineFile>)> = BTreeMap::new();
        for item in items {
            let (index, url) = self.group.url_for(item.user_id, path)?;
            shards
                .entry(index)
                .or_insert_with(|| (url, Vec::new()))
                .1
                .push(item.clone());
        }
        Ok(shards.into_values().collect())
    }
}

#[async_trait]
impl ArtifactService for WorkerClient {
    async fn find_artifact(&self, query: &UserMachineFile) -> Result<Option<Artifact>, ClientError> {
        let found = self.find_matching(std::slice::from_ref(query)).await?;
        Ok(found.into_values().next())
    }

    async fn request_artifact(&self, query: &UserMachineFile) -> Result<(), ClientError> {
        self.submit_requests(std::slice::from_ref(query)).await
    }

    async fn fetch_blob(&self, artifact: &Artifact, name: &str) -> Result<Vec<u8>, ClientError> {
        self.get_blob(artifact, name).await
    }
}

async fn check_status(
    resp: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound {
            endpoint: endpoint.to_string(),
        });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifex_core::{Language, Machine, UserId};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(servers: &[&MockServer]) -> WorkerClient {
        let endpoints = servers
            .iter()
            .map(|s| url::Url::parse(&s.uri()).unwrap())
            .collect();
        let config = WorkerClientConfig {
            blob_retry: BlobRetry {
                retries: 2,
                base_delay: std::time::Duration::from_millis(1),
            },
            ..Default::default()
        };
        WorkerClient::new(Arc::new(WorkerGroup::new(endpoints)), &config).unwrap()
    }

    fn artifact(user: i64) -> Artifact {
        Artifact {
            uuid: ArtifactId::new(),
            user_id: UserId::new(user),
            machine: Machine::new("m"),
            root: "/p".into(),
            language: Language::Python,
            files: vec!["index.json".into()],
            indexed_path_hashes: BTreeSet::new(),
            latest_file_update: Utc::now(),
            error: String::new(),
            error_kind: None,
        }
    }

    #[tokio::test]
    async fn submit_posts_wire_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/artifacts/submit-requests"))
            .and(body_json(serde_json::json!([
                {"UserID": 1, "Machine": "m", "Filename": "/a.py"}
            ])))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&[&server]);
        client
            .request_artifact(&UserMachineFile::new(UserId::new(1), Machine::new("m"), "/a.py"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn find_matching_merges_shards() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;
        // Shard order follows sorted endpoint URLs.
        let client = client_for(&[&first, &second]);
        let even_server = &client.group().endpoints()[0];
        let (even, odd) = if *even_server == url::Url::parse(&first.uri()).unwrap() {
            (&first, &second)
        } else {
            (&second, &first)
        };

        let a0 = artifact(0);
        let a1 = artifact(1);
        Mock::given(method("POST"))
            .and(path("/artifacts/find-matching"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(BTreeMap::from([(a0.uuid, a0.clone())])),
            )
            .expect(1)
            .mount(even)
            .await;
        Mock::given(method("POST"))
            .and(path("/artifacts/find-matching"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(BTreeMap::from([(a1.uuid, a1.clone())])),
            )
            .expect(1)
            .mount(odd)
            .await;

        let found = client
            .find_matching(&[
                UserMachineFile::new(UserId::new(0), Machine::new("m"), "/p/a.py"),
                UserMachineFile::new(UserId::new(1), Machine::new("m"), "/p/a.py"),
            ])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&a0.uuid], a0);
        assert_eq!(found[&a1.uuid], a1);
    }

    #[tokio::test]
    async fn find_artifact_returns_none_on_empty_map() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/artifacts/find-matching"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = client_for(&[&server]);
        let found = client
            .find_artifact(&UserMachineFile::new(UserId::new(1), Machine::new("m"), "/a.py"))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn blob_fetch_maps_404_and_other_statuses() {
        let server = MockServer::start().await;
        let present = artifact(1);
        let missing = artifact(1);
        let broken = artifact(1);
        Mock::given(method("GET"))
            .and(path(format!("/artifacts/{}/index.json", present.uuid)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/artifacts/{}/index.json", missing.uuid)))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/artifacts/{}/index.json", broken.uuid)))
            .respond_with(ResponseTemplate::new(503).set_body_string("draining"))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&[&server]);
        assert_eq!(client.fetch_blob(&present, "index.json").await.unwrap(), b"{}");
        assert!(client
            .fetch_blob(&missing, "index.json")
            .await
            .unwrap_err()
            .is_not_found());
        match client.fetch_blob(&broken, "index.json").await.unwrap_err() {
            ClientError::Status { status, body, .. } => {
                assert_eq!(status, 503);
                assert_eq!(body, "draining");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn blob_fetch_recovers_from_a_draining_server() {
        let server = MockServer::start().await;
        let artifact = artifact(1);
        let blob = format!("/artifacts/{}/index.json", artifact.uuid);
        Mock::given(method("GET"))
            .and(path(blob.clone()))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(blob))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&[&server]);
        assert_eq!(client.fetch_blob(&artifact, "index.json").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn no_endpoints_fails_without_network() {
        let client = WorkerClient::new(
            Arc::new(WorkerGroup::default()),
            &WorkerClientConfig::default(),
        )
        .unwrap();
        let err = client
            .find_artifact(&UserMachineFile::new(UserId::new(1), Machine::new("m"), "/a.py"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoEndpoints));
    }
}
