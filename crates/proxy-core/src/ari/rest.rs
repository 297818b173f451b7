//! ARI REST client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
pub use reqwest::Method;
use tracing::{debug, trace};

use crate::errors::{ProxyError, Result};

/// Channel variable set when the proxy could not create a dialogue for a call
pub const FAILURE_FLAG_VARIABLE: &str = "ARIPROXY_FAILED";
/// Channel variable carrying the reason for [`FAILURE_FLAG_VARIABLE`]
pub const FAILURE_REASON_VARIABLE: &str = "ARIPROXY_FAILURE_REASON";

/// A request against the ARI REST surface, relative to its base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AriRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    /// JSON request body
    pub body: Option<String>,
}

impl AriRequest {
    /// Request for `path`, relative to the ARI base URL
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Append a query parameter
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a JSON request body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Status and raw body of an ARI REST response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AriResponse {
    pub status: u16,
    pub body: String,
}

/// Executes REST requests against ARI.
///
/// Non-2xx responses are returned as responses; only transport failures
/// are errors.
#[async_trait]
pub trait AriRestClient: Send + Sync {
    async fn execute(&self, request: AriRequest) -> Result<AriResponse>;

    async fn set_channel_variable(&self, channel_id: &str, variable: &str, value: &str) -> Result<()> {
        let request = AriRequest::new(Method::POST, format!("/channels/{}/variable", channel_id))
            .with_query("variable", variable)
            .with_query("value", value);
        expect_success(self.execute(request).await?)
    }

    /// Hand the channel back to the dialplan, releasing it from Stasis control
    async fn continue_in_dialplan(&self, channel_id: &str) -> Result<()> {
        let request = AriRequest::new(Method::POST, format!("/channels/{}/continue", channel_id));
        expect_success(self.execute(request).await?)
    }
}

fn expect_success(response: AriResponse) -> Result<()> {
    if (200..300).contains(&response.status) {
        Ok(())
    } else {
        Err(ProxyError::Rest(format!(
            "unexpected status {}: {}",
            response.status, response.body
        )))
    }
}

/// [`AriRestClient`] over HTTP with basic authentication
#[derive(Debug, Clone)]
pub struct HttpAriClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpAriClient {
    /// Client for the ARI REST API at `base_url` using basic authentication.
    /// `timeout` bounds every request.
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    /// Base URL every request path is joined to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AriRestClient for HttpAriClient {
    async fn execute(&self, request: AriRequest) -> Result<AriResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!(method = %request.method, %url, "Sending ARI request");

        let mut builder = self
            .client
            .request(request.method, &url)
            .basic_auth(&self.username, Some(&self.password));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        trace!(status, bytes = body.len(), "ARI response received");

        Ok(AriResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, body_string, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpAriClient {
        HttpAriClient::new(
            format!("{}/ari", server.uri()),
            "asterisk",
            "secret",
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_execute_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ari/bridges"))
            .and(basic_auth("asterisk", "secret"))
            .and(body_string(r#"{"type":"mixing"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":"B1"}"#))
            .mount(&server)
            .await;

        let response = client(&server)
            .execute(AriRequest::new(Method::POST, "/bridges").with_body(r#"{"type":"mixing"}"#))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"id":"B1"}"#);
    }

    #[tokio::test]
    async fn test_set_channel_variable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ari/channels/C1/variable"))
            .and(query_param("variable", FAILURE_FLAG_VARIABLE))
            .and(query_param("value", "true"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        tokio_test::assert_ok!(
            client(&server)
                .set_channel_variable("C1", FAILURE_FLAG_VARIABLE, "true")
                .await
        );
    }

    #[tokio::test]
    async fn test_continue_reports_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ari/channels/C1/continue"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Channel not found"))
            .mount(&server)
            .await;

        let result = client(&server).continue_in_dialplan("C1").await;
        assert!(matches!(result, Err(ProxyError::Rest(_))));
    }
}
