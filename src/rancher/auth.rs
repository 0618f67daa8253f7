//! Admin login against the Rancher local auth provider

use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use super::transport::{send_with_retry, Request, RequestSender};
use super::RancherConfig;
use crate::retry::RetryConfig;
use crate::{Error, Result};

/// Rancher's local login payload uses capitalized field names
#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "Username")]
    username: &'a str,
    #[serde(rename = "Password")]
    password: &'a str,
}

/// Exchange the admin credential for a bearer token.
///
/// `POST /v3-public/localProviders/local?action=login`; expects 201 with a
/// `token` field in the response body.
pub async fn login(
    sender: &dyn RequestSender,
    config: &RancherConfig,
    password: &str,
    retry: &RetryConfig,
) -> Result<String> {
    let url = format!(
        "{}/v3-public/localProviders/local?action=login",
        config.base_url
    );
    let body = serde_json::to_string(&LoginRequest {
        username: "admin",
        password,
    })?;

    let response = send_with_retry(
        sender,
        config,
        &Request::post(url, body),
        retry,
        "rancher login",
    )
    .await?;

    if response.status != StatusCode::CREATED {
        return Err(Error::unexpected_status("rancher login", response.status));
    }

    let parsed: serde_json::Value = serde_json::from_str(&response.body)?;
    let token = parsed
        .get("token")
        .and_then(|t| t.as_str())
        .ok_or_else(|| Error::missing_field("rancher login", "token"))?;

    debug!("logged in to Rancher");
    Ok(token.to_string())
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
            access_token: String::new(),
            trusted_ca: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_login_returns_token() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().times(1).returning(|_, request| {
            let body = request.json_body.as_ref().unwrap();
            assert!(body.contains(r#""Username":"admin""#));
            assert!(body.contains(r#""Password":"s3cret""#));
            Ok(Response {
                status: StatusCode::CREATED,
                body: r#"{"token":"token-abc","ttl":57600000}"#.to_string(),
            })
        });

        let token = login(
            &sender,
            &test_config(),
            "s3cret",
            &RetryConfig::with_max_attempts(1),
        )
        .await
        .unwrap();
        assert_eq!(token, "token-abc");
    }

    #[tokio::test]
    async fn test_login_unexpected_status() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().times(1).returning(|_, _| {
            Ok(Response {
                status: StatusCode::UNAUTHORIZED,
                body: String::new(),
            })
        });

        let result = login(
            &sender,
            &test_config(),
            "wrong",
            &RetryConfig::with_max_attempts(1),
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::UnexpectedStatus { operation: "rancher login", .. })
        ));
    }

    #[tokio::test]
    async fn test_login_missing_token_field() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().times(1).returning(|_, _| {
            Ok(Response {
                status: StatusCode::CREATED,
                body: r#"{"ttl":57600000}"#.to_string(),
            })
        });

        let result = login(
            &sender,
            &test_config(),
            "s3cret",
            &RetryConfig::with_max_attempts(1),
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::MissingField { field: "token", .. })
        ));
    }
}
