//! HTTP transport for the Rancher API
//!
//! All Rancher calls go through [`send_with_retry`], which drives a
//! [`RequestSender`] under the exponential-backoff policy. The production
//! sender builds a fresh reqwest client per call because the trust anchors
//! and the pinned ingress address come from per-attempt config; unit tests
//! substitute a mock sender.
//!
//! Retry classification: server errors (5xx) and transport failures
//! (connect, TLS, DNS, timeout) retry; any other completed response -
//! including 4xx - is returned to the caller to interpret.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Method, Proxy, StatusCode};

#[cfg(test)]
use mockall::automock;

use super::RancherConfig;
use crate::retry::{retry_with_backoff, Attempt, RetryConfig};
use crate::{Error, Result};

/// TCP connect / TLS handshake timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall per-request timeout, response body included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variables consulted for the forward proxy, in priority order
const PROXY_ENV_VARS: [&str; 4] = ["https_proxy", "HTTPS_PROXY", "http_proxy", "HTTP_PROXY"];

/// An outbound Rancher API request
///
/// Bodies are owned strings so a retried request replays identical bytes.
#[derive(Clone, Debug)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Bearer token for the Authorization header, if any
    pub bearer_token: Option<String>,
    /// JSON body; its presence also sets the JSON content type
    pub json_body: Option<String>,
}

impl Request {
    /// Build a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            bearer_token: None,
            json_body: None,
        }
    }

    /// Build a POST request with a JSON body
    pub fn post(url: impl Into<String>, json_body: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            bearer_token: None,
            json_body: Some(json_body.into()),
        }
    }

    /// Build a PUT request with a JSON body
    pub fn put(url: impl Into<String>, json_body: impl Into<String>) -> Self {
        Self {
            method: Method::PUT,
            url: url.into(),
            bearer_token: None,
            json_body: Some(json_body.into()),
        }
    }

    /// Attach a bearer token
    pub fn with_bearer(mut self, token: &str) -> Self {
        self.bearer_token = Some(token.to_string());
        self
    }
}

/// A completed Rancher API response
#[derive(Clone, Debug)]
pub struct Response {
    /// HTTP status code
    pub status: StatusCode,
    /// Response body, fully drained
    pub body: String,
}

/// Single-request sending capability
///
/// The one seam between the Rancher client stack and the network. Production
/// code uses [`HttpSender`]; tests use the generated mock.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RequestSender: Send + Sync {
    /// Send one request and return the completed response
    async fn send(&self, config: &RancherConfig, request: &Request) -> Result<Response>;
}

/// Production [`RequestSender`] backed by reqwest
///
/// The client trusts `config.trusted_ca` (system roots only when empty) and
/// pins `config.host` to `config.host_ip:config.host_port` through a resolver
/// override, so SNI, certificate verification, and the Host header all carry
/// the ingress hostname while the socket connects to the node address.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpSender;

impl HttpSender {
    fn build_client(config: &RancherConfig) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .no_proxy();

        if let Some(proxy_url) = proxy_from_env() {
            builder = builder.proxy(Proxy::all(&proxy_url)?);
        }

        if !config.trusted_ca.is_empty() {
            builder = builder.add_root_certificate(Certificate::from_pem(&config.trusted_ca)?);
        }

        let ip: IpAddr = config.host_ip.parse().map_err(|_| {
            Error::cluster_state(format!("ingress node address {} is not an IP", config.host_ip))
        })?;
        builder = builder.resolve(&config.host, SocketAddr::new(ip, config.host_port as u16));

        Ok(builder.build()?)
    }
}

#[async_trait]
impl RequestSender for HttpSender {
    async fn send(&self, config: &RancherConfig, request: &Request) -> Result<Response> {
        let client = Self::build_client(config)?;

        let mut builder = client.request(request.method.clone(), &request.url);
        if let Some(ref token) = request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.json_body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(Response { status, body })
    }
}

/// First proxy URL found in the environment, in [`PROXY_ENV_VARS`] order
fn proxy_from_env() -> Option<String> {
    PROXY_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
}

/// Send a request under the retry policy.
///
/// 5xx statuses and transport errors retry with backoff; any other completed
/// response terminates the loop and is handed to the caller. Exhausting the
/// budget returns the last observed error.
pub async fn send_with_retry(
    sender: &dyn RequestSender,
    config: &RancherConfig,
    request: &Request,
    retry: &RetryConfig,
    operation: &'static str,
) -> Result<Response> {
    retry_with_backoff(retry, operation, || async {
        match sender.send(config, request).await {
            Ok(response) if response.status.is_server_error() => {
                Attempt::Retry(Error::unexpected_status(operation, response.status))
            }
            Ok(response) => Attempt::Done(response),
            Err(e) => Attempt::Retry(e),
        }
    })
    .await
}
