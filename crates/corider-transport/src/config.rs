//! Transport configuration

use crate::backoff::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Primary channel endpoint
pub const PRIMARY_CHANNEL_ENDPOINT: &str = "/ws-native";
/// Endpoints tried, in order, when the primary handshake fails
pub const FALLBACK_CHANNEL_ENDPOINTS: [&str; 3] = ["/ws/websocket", "/websocket", "/ws"];
/// Queue carrying offers to drivers
pub const DRIVER_QUEUE: &str = "/user/queue/ride-offers";
/// Queue carrying matching updates to riders
pub const RIDER_QUEUE: &str = "/user/queue/ride-matching";

/// REST retry budget for network errors and read timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay between attempts
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy {
                base_ms: 200,
                cap_ms: 2_000,
            },
        }
    }
}

impl RetryPolicy {
    /// Policy that sends once and never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// REST and channel endpoints, timeouts, and retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// REST API root
    pub base_url: String,
    /// WebSocket origin the channel endpoints are appended to
    pub channel_url: String,
    /// Channel endpoints, primary first
    pub channel_endpoints: Vec<String>,
    /// Destination of the driver offer queue
    pub driver_queue: String,
    /// Destination of the rider matching queue
    pub rider_queue: String,
    /// Per-call REST deadline in milliseconds
    pub rest_timeout_ms: u64,
    /// WebSocket plus STOMP handshake deadline in milliseconds
    pub connect_timeout_ms: u64,
    /// Retries for network errors and read timeouts
    pub rest_retry: RetryPolicy,
    /// Channel reconnect backoff
    pub reconnect: BackoffPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let mut channel_endpoints = vec![PRIMARY_CHANNEL_ENDPOINT.to_string()];
        channel_endpoints.extend(FALLBACK_CHANNEL_ENDPOINTS.iter().map(|s| (*s).to_string()));
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            channel_url: "ws://localhost:8080".to_string(),
            channel_endpoints,
            driver_queue: DRIVER_QUEUE.to_string(),
            rider_queue: RIDER_QUEUE.to_string(),
            rest_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            rest_retry: RetryPolicy::default(),
            reconnect: BackoffPolicy::default(),
        }
    }
}

impl TransportConfig {
    /// Per-call REST deadline
    pub fn rest_timeout(&self) -> Duration {
        Duration::from_millis(self.rest_timeout_ms)
    }

    /// Channel handshake deadline
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Full WebSocket URLs for every configured endpoint, primary first
    pub fn channel_endpoint_urls(&self) -> Vec<String> {
        let origin = self.channel_url.trim_end_matches('/');
        self.channel_endpoints
            .iter()
            .map(|endpoint| format!("{origin}{endpoint}"))
            .collect()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let base = Url::parse(&self.base_url).map_err(|e| format!("base_url: {e}"))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(format!("base_url must be http or https, got {}", base.scheme()));
        }

        let channel = Url::parse(&self.channel_url).map_err(|e| format!("channel_url: {e}"))?;
        if !matches!(channel.scheme(), "ws" | "wss") {
            return Err(format!("channel_url must be ws or wss, got {}", channel.scheme()));
        }

        if self.channel_endpoints.is_empty() {
            return Err("channel_endpoints must not be empty".to_string());
        }
        if let Some(bad) = self.channel_endpoints.iter().find(|e| !e.starts_with('/')) {
            return Err(format!("channel endpoint '{bad}' must start with '/'"));
        }

        for (name, queue) in [("driver_queue", &self.driver_queue), ("rider_queue", &self.rider_queue)] {
            if !queue.starts_with('/') {
                return Err(format!("{name} must start with '/'"));
            }
        }

        if self.rest_timeout_ms == 0 {
            return Err("rest_timeout_ms must be greater than 0".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be greater than 0".to_string());
        }
        if self.rest_retry.max_attempts == 0 {
            return Err("rest_retry.max_attempts must be at least 1".to_string());
        }

        self.rest_retry.backoff.validate()?;
        self.reconnect.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_layout() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.channel_endpoint_urls(),
            vec![
                "ws://localhost:8080/ws-native",
                "ws://localhost:8080/ws/websocket",
                "ws://localhost:8080/websocket",
                "ws://localhost:8080/ws",
            ]
        );
        assert_eq!(config.rest_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn rejects_http_channel_url() {
        let config = TransportConfig {
            channel_url: "http://localhost:8080".to_string(),
            ..TransportConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("ws or wss"));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: TransportConfig =
            serde_json::from_value(serde_json::json!({ "base_url": "https://api.example.edu/api/v1" }))
                .unwrap();
        assert_eq!(config.base_url, "https://api.example.edu/api/v1");
        assert_eq!(config.rider_queue, RIDER_QUEUE);
    }
}
