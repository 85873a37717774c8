//! HTTP REST transport backed by `reqwest`

use crate::config::TransportConfig;
use crate::error::{ApiErrorBody, TransportError};
use crate::request::{ApiRequest, ApiResponse, Method};
use crate::traits::RestTransport;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// [`RestTransport`] over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpRestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRestTransport {
    /// Create a transport for `config.base_url` with the configured deadline
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.rest_timeout())
            .build()
            .map_err(|e| TransportError::network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.rest_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_connect() || err.is_builder() {
            TransportError::network(err.to_string())
        } else {
            // Request may have reached the server; outcome unknown.
            debug!(error = %err, "Treating HTTP failure as timeout");
            TransportError::timeout(self.timeout)
        }
    }
}

fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl RestTransport for HttpRestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .request(method(request.method), self.url(&request.path));
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;

        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        debug!(
            method = %request.method,
            path = %request.path,
            status,
            "REST exchange completed"
        );

        if (200..300).contains(&status) {
            Ok(ApiResponse::new(status, body))
        } else {
            Err(TransportError::server(status, ApiErrorBody::from_envelope(&body)))
        }
    }
}
