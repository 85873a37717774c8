//! Transport adapter
//!
//! Combines the REST seam, the authorizer and the channel actor behind one
//! handle. REST calls are authorized, recover once from 401 through the
//! authorizer, and retry network failures (and read timeouts) with backoff.

use crate::channel::{ChannelHandle, Subscription};
use crate::config::{RetryPolicy, TransportConfig};
use crate::error::{CallError, ChannelError};
use crate::request::{ApiRequest, ApiResponse};
use crate::traits::{Authorizer, ChannelConnector, RestTransport};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// Entry point for every backend interaction
#[derive(Clone)]
pub struct TransportAdapter {
    rest: Arc<dyn RestTransport>,
    authorizer: Arc<dyn Authorizer>,
    retry: RetryPolicy,
    channel: ChannelHandle,
    driver_queue: String,
    rider_queue: String,
}

impl std::fmt::Debug for TransportAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportAdapter")
            .field("retry", &self.retry)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl TransportAdapter {
    /// Build the adapter and spawn its channel actor on the current runtime
    pub fn new(
        rest: Arc<dyn RestTransport>,
        connector: Arc<dyn ChannelConnector>,
        authorizer: Arc<dyn Authorizer>,
        config: &TransportConfig,
    ) -> Self {
        let channel = ChannelHandle::spawn(
            connector,
            Arc::clone(&authorizer),
            config.channel_endpoint_urls(),
            config.reconnect.clone(),
        );
        Self {
            rest,
            authorizer,
            retry: config.rest_retry.clone(),
            channel,
            driver_queue: config.driver_queue.clone(),
            rider_queue: config.rider_queue.clone(),
        }
    }

    /// Perform one authorized REST call.
    ///
    /// A 401 triggers one credential recovery and one resend. Network errors
    /// are retried for every method; timeouts only for `GET`.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse, CallError> {
        let mut attempt: u32 = 0;
        let mut recovered = false;

        loop {
            let (authorized, generation) = self.authorizer.authorize(request.clone()).await?;
            let err = match self.rest.send(authorized).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if err.is_unauthorized() && !recovered {
                debug!(request = %request, generation, "Unauthorized, recovering credential");
                recovered = true;
                self.authorizer.on_unauthorized(generation).await?;
                continue;
            }

            if err.is_retryable_for(request.method) && attempt + 1 < self.retry.max_attempts {
                let delay = self.retry.backoff.delay(attempt);
                attempt += 1;
                warn!(
                    request = %request,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retrying REST call"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            debug!(request = %request, error = %err, "REST call failed");
            return Err(err.into());
        }
    }

    /// [`call`](Self::call) and decode the body
    pub async fn call_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, CallError> {
        self.call(request).await?.json()
    }

    /// Subscribe to a queue on the shared channel connection
    pub fn subscribe(&self, queue: &str) -> Result<Subscription, ChannelError> {
        self.channel.subscribe(queue)
    }

    /// Queue carrying offers and updates for drivers
    pub fn driver_queue(&self) -> &str {
        &self.driver_queue
    }

    /// Queue carrying updates for the logged-in rider
    pub fn rider_queue(&self) -> &str {
        &self.rider_queue
    }

    /// Handle to the shared push channel actor
    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    /// Close the channel connection; REST calls remain usable
    pub fn shutdown(&self) {
        self.channel.shutdown();
    }
}
