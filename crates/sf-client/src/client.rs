//! Core HTTP client with compression and Salesforce-specific handling.

use tracing::{debug, info, instrument};

use crate::config::ClientConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::request::{RequestBody, RequestBuilder, RequestMethod};
use crate::response::{Response, ResponseExt};
use crate::SESSION_HEADER;

/// HTTP client for Salesforce APIs with compression and error handling.
///
/// Every request is issued exactly once.
#[derive(Debug, Clone)]
pub struct SfHttpClient {
    inner: reqwest::Client,
    config: ClientConfig,
}

impl SfHttpClient {
    /// Create a new HTTP client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        builder = builder
            .gzip(config.compression)
            .deflate(config.compression);

        let inner = builder
            .build()
            .map_err(|e| Error::with_source(ErrorKind::Config(e.to_string()), e))?;

        Ok(Self { inner, config })
    }

    /// Create a new HTTP client with default configuration.
    pub fn default_client() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create a GET request builder.
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(RequestMethod::Get, url)
    }

    /// Create a POST request builder.
    pub fn post(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(RequestMethod::Post, url)
    }

    /// Execute a request and map non-2xx responses to errors.
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    pub async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.execute_raw(&request).await?;
        response.check_remote_error().await
    }

    /// Execute a request without inspecting the status code.
    ///
    /// Used by callers that parse their own error envelopes (SOAP faults).
    pub async fn execute_raw(&self, request: &RequestBuilder) -> Result<Response> {
        let mut req = self
            .inner
            .request(request.method.to_reqwest(), &request.url);

        if let Some(ref session_id) = request.session_id {
            req = req.header(SESSION_HEADER, session_id.as_str());
        }

        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        if self.config.compression {
            req = req.header("Accept-Encoding", "gzip, deflate");
        }

        if let Some(ref body) = request.body {
            req = match body {
                RequestBody::Json(value) => req.body(serde_json::to_vec(value)?),
                RequestBody::Text(text) => req.body(text.clone()),
                RequestBody::Form(data) => req.body(encode_form(data)),
            };
        }

        if self.config.trace_requests {
            debug!(method = ?request.method, url = %request.url, "Sending request");
        }

        let response = req.send().await?;

        if self.config.trace_requests {
            let status = response.status().as_u16();
            let content_length = response.content_length();

            if response.status().is_success() {
                debug!(status, content_length, "Response received");
            } else {
                info!(status, content_length, "Non-success response");
            }
        }

        Ok(Response::new(response))
    }

    /// Execute a request and deserialize the JSON response.
    pub async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = self.execute(request).await?;
        response.json().await
    }
}

fn encode_form(data: &std::collections::HashMap<String, String>) -> String {
    let mut pairs: Vec<_> = data.iter().collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_client_creation() {
        let client = SfHttpClient::default_client().unwrap();
        assert!(client.config().compression);
        assert!(client.config().timeout.is_none());
    }

    #[tokio::test]
    async fn test_session_header_is_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/services/async/62.0/job/750x"))
            .and(header("X-SFDC-Session", "00Dxx!session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "750x"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = SfHttpClient::default_client().unwrap();
        let value: serde_json::Value = client
            .send_json(
                client
                    .get(format!("{}/services/async/62.0/job/750x", mock_server.uri()))
                    .session("00Dxx!session"),
            )
            .await
            .unwrap();

        assert_eq!(value["id"], "750x");
    }

    #[tokio::test]
    async fn test_exception_payload_on_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/job"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "exceptionCode": "InvalidJob",
                "exceptionMessage": "Unable to find object: Acount"
            })))
            .mount(&mock_server)
            .await;

        let client = SfHttpClient::default_client().unwrap();
        let err = client
            .execute(
                client
                    .post(format!("{}/job", mock_server.uri()))
                    .json(&serde_json::json!({"object": "Acount"}))
                    .unwrap(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.exception_code(), Some("InvalidJob"));
    }

    #[tokio::test]
    async fn test_exception_payload_in_success_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/job/750x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "exceptionCode": "InvalidSessionId",
                "exceptionMessage": "Invalid session id"
            })))
            .mount(&mock_server)
            .await;

        let client = SfHttpClient::default_client().unwrap();
        let err = client
            .send_json::<serde_json::Value>(client.get(format!("{}/job/750x", mock_server.uri())))
            .await
            .unwrap_err();

        assert!(err.is_auth_error());
    }

    #[tokio::test]
    async fn test_single_attempt_on_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = SfHttpClient::default_client().unwrap();
        let err = client
            .execute(client.get(format!("{}/flaky", mock_server.uri())))
            .await
            .unwrap_err();

        assert!(matches!(err.kind, ErrorKind::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_form_body_is_url_encoded() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("Content-Type", "application/x-www-form-urlencoded"))
            .and(body_string("grant_type=refresh_token&refresh_token=a%2Fb"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut form = HashMap::new();
        form.insert("grant_type".to_string(), "refresh_token".to_string());
        form.insert("refresh_token".to_string(), "a/b".to_string());

        let client = SfHttpClient::default_client().unwrap();
        client
            .execute(client.post(format!("{}/token", mock_server.uri())).form(form))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_execute_raw_keeps_error_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/soap"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<faultstring>bad</faultstring>"))
            .mount(&mock_server)
            .await;

        let client = SfHttpClient::default_client().unwrap();
        let request = client
            .post(format!("{}/soap", mock_server.uri()))
            .xml("<env:Envelope/>");
        let response = client.execute_raw(&request).await.unwrap();

        assert_eq!(response.status(), 500);
        assert!(response.text().await.unwrap().contains("faultstring"));
    }
}
