//! Fleet listing with pagination and change detection
//!
//! The cluster list is hashed over the concatenated raw page bodies in fetch
//! order, before JSON decoding, so any byte-level change - including fields
//! this client does not parse - is detected by the syncer.

use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::transport::{send_with_retry, Request, RequestSender};
use super::{RancherCluster, RancherConfig};
use crate::retry::RetryConfig;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct ClusterPage {
    #[serde(default)]
    data: Vec<ClusterEntry>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<String>,
}

/// Fetch the full cluster list known to Rancher.
///
/// Follows `pagination.next` links until exhausted, accumulating entries in
/// page order. Returns the clusters and the content hash of the raw
/// response bodies.
pub async fn list_all_clusters(
    sender: &dyn RequestSender,
    config: &RancherConfig,
    retry: &RetryConfig,
) -> Result<(Vec<RancherCluster>, String)> {
    let mut url = format!("{}/v3/cluster", config.base_url);
    let mut clusters = Vec::new();
    let mut hasher = Sha256::new();

    loop {
        let request = Request::get(&url).with_bearer(&config.access_token);
        let response = send_with_retry(sender, config, &request, retry, "cluster list").await?;
        if response.status != StatusCode::OK {
            return Err(Error::unexpected_status("cluster list", response.status));
        }

        hasher.update(response.body.as_bytes());

        let page: ClusterPage = serde_json::from_str(&response.body)?;
        clusters.extend(page.data.into_iter().map(|entry| RancherCluster {
            name: entry.name,
            id: entry.id,
        }));

        match page.pagination.and_then(|p| p.next) {
            Some(next) => url = next,
            None => break,
        }
    }

    Ok((clusters, format!("{:x}", hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rancher::transport::{MockRequestSender, Response};

    fn test_config() -> RancherConfig {
        RancherConfig {
            host: "rancher.example.com".to_string(),
            host_ip: "10.0.0.7".to_string(),
            host_port: 31443,
            base_url: "https://rancher.example.com:31443".to_string(),
            access_token: "token-abc".to_string(),
            trusted_ca: Vec::new(),
        }
    }

    fn retry_once() -> RetryConfig {
        RetryConfig::with_max_attempts(1)
    }

    #[tokio::test]
    async fn test_single_page_listing() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().times(1).returning(|_, request| {
            assert!(request.url.ends_with("/v3/cluster"));
            assert_eq!(request.bearer_token.as_deref(), Some("token-abc"));
            Ok(Response {
                status: StatusCode::OK,
                body: r#"{"data":[{"name":"local","id":"local"},{"name":"c1","id":"id1"}]}"#
                    .to_string(),
            })
        });

        let (clusters, hash) = list_all_clusters(&sender, &test_config(), &retry_once())
            .await
            .unwrap();

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[1].name, "c1");
        assert_eq!(clusters[1].id, "id1");
        assert_eq!(hash.len(), 64);
    }

    #[tokio::test]
    async fn test_pagination_accumulates_in_page_order() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().times(2).returning(|_, request| {
            let body = if request.url.contains("marker=page2") {
                r#"{"data":[{"name":"c2","id":"id2"}]}"#
            } else {
                r#"{"data":[{"name":"c1","id":"id1"}],"pagination":{"next":"https://rancher.example.com:31443/v3/cluster?marker=page2"}}"#
            };
            Ok(Response {
                status: StatusCode::OK,
                body: body.to_string(),
            })
        });

        let (clusters, _) = list_all_clusters(&sender, &test_config(), &retry_once())
            .await
            .unwrap();

        assert_eq!(
            clusters,
            vec![
                RancherCluster {
                    name: "c1".to_string(),
                    id: "id1".to_string()
                },
                RancherCluster {
                    name: "c2".to_string(),
                    id: "id2".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_hash_stable_for_identical_bodies() {
        let body = r#"{"data":[{"name":"c1","id":"id1"}]}"#;

        let mut hashes = Vec::new();
        for _ in 0..2 {
            let mut sender = MockRequestSender::new();
            let body = body.to_string();
            sender.expect_send().returning(move |_, _| {
                Ok(Response {
                    status: StatusCode::OK,
                    body: body.clone(),
                })
            });
            let (_, hash) = list_all_clusters(&sender, &test_config(), &retry_once())
                .await
                .unwrap();
            hashes.push(hash);
        }

        assert_eq!(hashes[0], hashes[1]);
    }

    #[tokio::test]
    async fn test_hash_differs_on_any_byte_change() {
        // The differing field is one this client does not otherwise parse
        let bodies = [
            r#"{"data":[{"name":"c1","id":"id1","state":"active"}]}"#,
            r#"{"data":[{"name":"c1","id":"id1","state":"updating"}]}"#,
        ];

        let mut hashes = Vec::new();
        for body in bodies {
            let mut sender = MockRequestSender::new();
            sender.expect_send().returning(move |_, _| {
                Ok(Response {
                    status: StatusCode::OK,
                    body: body.to_string(),
                })
            });
            let (clusters, hash) = list_all_clusters(&sender, &test_config(), &retry_once())
                .await
                .unwrap();
            assert_eq!(clusters.len(), 1);
            hashes.push(hash);
        }

        assert_ne!(hashes[0], hashes[1]);
    }

    #[tokio::test]
    async fn test_non_ok_status_is_an_error() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().times(1).returning(|_, _| {
            Ok(Response {
                status: StatusCode::UNAUTHORIZED,
                body: String::new(),
            })
        });

        let result = list_all_clusters(&sender, &test_config(), &retry_once()).await;
        assert!(matches!(
            result,
            Err(Error::UnexpectedStatus { operation: "cluster list", .. })
        ));
    }
}
