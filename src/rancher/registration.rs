//! Cluster registration protocol
//!
//! Four sequential steps share one [`RancherConfig`]: resolve config and log
//! in (the caller's job), import the cluster (or find it if already
//! imported), obtain a one-time registration token, and fetch the manifest
//! YAML the managed cluster must apply to complete enrollment.

use reqwest::StatusCode;
use tracing::{debug, info};

use super::transport::{send_with_retry, Request, RequestSender};
use super::RancherConfig;
use crate::retry::RetryConfig;
use crate::{Error, Result};

/// Result of a completed registration exchange
#[derive(Clone, Debug)]
pub struct Registration {
    /// Cluster id assigned by Rancher
    pub cluster_id: String,
    /// One-time registration token
    pub token: String,
    /// Registration manifest YAML, returned verbatim
    pub manifest: String,
}

/// Run the registration protocol for a named cluster.
///
/// The config must already carry a valid access token.
pub async fn register_cluster(
    sender: &dyn RequestSender,
    config: &RancherConfig,
    cluster_name: &str,
    retry: &RetryConfig,
) -> Result<Registration> {
    let cluster_id = import_cluster(sender, config, cluster_name, retry).await?;
    let token = create_registration_token(sender, config, &cluster_id, retry).await?;
    let manifest = fetch_manifest(sender, config, &token, retry).await?;

    info!(cluster = %cluster_name, cluster_id = %cluster_id, "cluster registered with Rancher");
    Ok(Registration {
        cluster_id,
        token,
        manifest,
    })
}

/// Import a cluster by name, returning its Rancher id.
///
/// 422 means the name already exists remotely and is handled by looking the
/// id up instead; that path is an alternate success, not an error.
async fn import_cluster(
    sender: &dyn RequestSender,
    config: &RancherConfig,
    cluster_name: &str,
    retry: &RetryConfig,
) -> Result<String> {
    let descriptor = serde_json::json!({
        "type": "cluster",
        "name": cluster_name,
        "dockerRootDir": "/var/lib/docker",
        "enableClusterAlerting": false,
        "enableClusterMonitoring": false,
        "enableNetworkPolicy": false,
    });
    let request = Request::post(
        format!("{}/v3/cluster", config.base_url),
        descriptor.to_string(),
    )
    .with_bearer(&config.access_token);

    let response = send_with_retry(sender, config, &request, retry, "cluster import").await?;
    match response.status {
        StatusCode::CREATED => {
            let parsed: serde_json::Value = serde_json::from_str(&response.body)?;
            parsed
                .get("id")
                .and_then(|id| id.as_str())
                .map(str::to_string)
                .ok_or_else(|| Error::missing_field("cluster import", "id"))
        }
        StatusCode::UNPROCESSABLE_ENTITY => {
            debug!(cluster = %cluster_name, "cluster already imported, looking up id");
            find_cluster_id_by_name(sender, config, cluster_name, retry).await
        }
        status => Err(Error::unexpected_status("cluster import", status)),
    }
}

/// Look up the id of an already-imported cluster by name.
///
/// Cluster names are unique within Rancher, so only the first match is used.
async fn find_cluster_id_by_name(
    sender: &dyn RequestSender,
    config: &RancherConfig,
    cluster_name: &str,
    retry: &RetryConfig,
) -> Result<String> {
    let request = Request::get(format!(
        "{}/v3/clusters?name={}",
        config.base_url, cluster_name
    ))
    .with_bearer(&config.access_token);

    let response = send_with_retry(sender, config, &request, retry, "cluster lookup").await?;
    if response.status != StatusCode::OK {
        return Err(Error::unexpected_status("cluster lookup", response.status));
    }

    let parsed: serde_json::Value = serde_json::from_str(&response.body)?;
    parsed
        .get("data")
        .and_then(|data| data.get(0))
        .and_then(|cluster| cluster.get("id"))
        .and_then(|id| id.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::missing_field("cluster lookup", "id"))
}

/// Obtain a one-time registration token for an imported cluster
async fn create_registration_token(
    sender: &dyn RequestSender,
    config: &RancherConfig,
    cluster_id: &str,
    retry: &RetryConfig,
) -> Result<String> {
    let payload = serde_json::json!({
        "type": "clusterRegistrationToken",
        "clusterId": cluster_id,
    });
    let request = Request::post(
        format!("{}/v3/clusterregistrationtoken", config.base_url),
        payload.to_string(),
    )
    .with_bearer(&config.access_token);

    let response =
        send_with_retry(sender, config, &request, retry, "registration token").await?;
    if response.status != StatusCode::CREATED {
        return Err(Error::unexpected_status(
            "registration token",
            response.status,
        ));
    }

    let parsed: serde_json::Value = serde_json::from_str(&response.body)?;
    parsed
        .get("token")
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::missing_field("registration token", "token"))
}

/// Fetch the registration manifest YAML for a token
async fn fetch_manifest(
    sender: &dyn RequestSender,
    config: &RancherConfig,
    token: &str,
    retry: &RetryConfig,
) -> Result<String> {
    let request = Request::get(format!("{}/v3/import/{}.yaml", config.base_url, token))
        .with_bearer(&config.access_token);

    let response =
        send_with_retry(sender, config, &request, retry, "registration manifest").await?;
    if response.status != StatusCode::OK {
        return Err(Error::unexpected_status(
            "registration manifest",
            response.status,
        ));
    }
    Ok(response.body)
}

/// Fetch the remote state string of a single cluster (e.g. `"active"`)
pub(crate) async fn fetch_cluster_state(
    sender: &dyn RequestSender,
    config: &RancherConfig,
    cluster_id: &str,
    retry: &RetryConfig,
) -> Result<String> {
    let request = Request::get(format!("{}/v3/cluster/{}", config.base_url, cluster_id))
        .with_bearer(&config.access_token);

    let response = send_with_retry(sender, config, &request, retry, "cluster state").await?;
    if response.status != StatusCode::OK {
        return Err(Error::unexpected_status("cluster state", response.status));
    }

    let parsed: serde_json::Value = serde_json::from_str(&response.body)?;
    parsed
        .get("state")
        .and_then(|s| s.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::missing_field("cluster state", "state"))
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
    async fn test_register_cluster_happy_path() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().returning(|_, request| {
            // Every protocol step carries the bearer token
            assert_eq!(request.bearer_token.as_deref(), Some("token-abc"));
            let response = if request.url.ends_with("/v3/cluster") {
                Response {
                    status: StatusCode::CREATED,
                    body: r#"{"id":"c-x7f2k"}"#.to_string(),
                }
            } else if request.url.ends_with("/v3/clusterregistrationtoken") {
                let body = request.json_body.as_ref().unwrap();
                assert!(body.contains(r#""clusterId":"c-x7f2k""#));
                Response {
                    status: StatusCode::CREATED,
                    body: r#"{"token":"reg-token-1"}"#.to_string(),
                }
            } else if request.url.ends_with("/v3/import/reg-token-1.yaml") {
                Response {
                    status: StatusCode::OK,
                    body: "apiVersion: v1\nkind: Namespace\n".to_string(),
                }
            } else {
                panic!("unexpected url {}", request.url);
            };
            Ok(response)
        });

        let registration = register_cluster(&sender, &test_config(), "c1", &retry_once())
            .await
            .unwrap();
        assert_eq!(registration.cluster_id, "c-x7f2k");
        assert_eq!(registration.token, "reg-token-1");
        assert!(registration.manifest.starts_with("apiVersion: v1"));
    }

    #[tokio::test]
    async fn test_import_falls_back_to_lookup_on_422() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().returning(|_, request| {
            let response = if request.url.ends_with("/v3/cluster") {
                Response {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    body: r#"{"code":"NotUnique"}"#.to_string(),
                }
            } else if request.url.ends_with("/v3/clusters?name=c1") {
                Response {
                    status: StatusCode::OK,
                    body: r#"{"data":[{"name":"c1","id":"id9"}]}"#.to_string(),
                }
            } else {
                panic!("unexpected url {}", request.url);
            };
            Ok(response)
        });

        let cluster_id = import_cluster(&sender, &test_config(), "c1", &retry_once())
            .await
            .unwrap();
        assert_eq!(cluster_id, "id9");
    }

    #[tokio::test]
    async fn test_import_hard_failure_on_other_status() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().times(1).returning(|_, _| {
            Ok(Response {
                status: StatusCode::FORBIDDEN,
                body: String::new(),
            })
        });

        let result = import_cluster(&sender, &test_config(), "c1", &retry_once()).await;
        assert!(matches!(
            result,
            Err(Error::UnexpectedStatus { operation: "cluster import", .. })
        ));
    }

    #[tokio::test]
    async fn test_import_missing_id_field() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().times(1).returning(|_, _| {
            Ok(Response {
                status: StatusCode::CREATED,
                body: r#"{"name":"c1"}"#.to_string(),
            })
        });

        let result = import_cluster(&sender, &test_config(), "c1", &retry_once()).await;
        assert!(matches!(
            result,
            Err(Error::MissingField { field: "id", .. })
        ));
    }

    #[tokio::test]
    async fn test_lookup_empty_data_is_missing_field() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().times(1).returning(|_, _| {
            Ok(Response {
                status: StatusCode::OK,
                body: r#"{"data":[]}"#.to_string(),
            })
        });

        let result = find_cluster_id_by_name(&sender, &test_config(), "c1", &retry_once()).await;
        assert!(matches!(result, Err(Error::MissingField { .. })));
    }

    #[tokio::test]
    async fn test_fetch_cluster_state() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().times(1).returning(|_, request| {
            assert!(request.url.ends_with("/v3/cluster/c-x7f2k"));
            Ok(Response {
                status: StatusCode::OK,
                body: r#"{"state":"active","agentImage":"rancher/agent:v2"}"#.to_string(),
            })
        });

        let state = fetch_cluster_state(&sender, &test_config(), "c-x7f2k", &retry_once())
            .await
            .unwrap();
        assert_eq!(state, "active");
    }
}
