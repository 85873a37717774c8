//! Transport seams
//!
//! The adapter talks to the backend only through these traits. Production
//! code plugs in [`HttpRestTransport`](crate::HttpRestTransport) and
//! [`StompConnector`](crate::StompConnector); tests plug in an in-memory
//! backend.

use crate::error::{CallError, ChannelError, TransportError};
use crate::request::{ApiRequest, ApiResponse};
use async_trait::async_trait;

/// One raw HTTP exchange, no retries or authorization logic
#[async_trait]
pub trait RestTransport: Send + Sync {
    /// Send `request`; non-2xx statuses come back as [`TransportError::Server`]
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Message delivered on a subscribed destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Destination the message arrived on
    pub destination: String,
    /// Raw message body
    pub body: String,
}

/// Opens channel connections
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Complete the WebSocket and STOMP handshakes at `endpoint`
    async fn connect(
        &self,
        endpoint: &str,
        bearer: &str,
    ) -> Result<Box<dyn ChannelConnection>, ChannelError>;
}

/// One established channel connection
#[async_trait]
pub trait ChannelConnection: Send {
    /// Start receiving `destination`
    async fn subscribe(&mut self, destination: &str) -> Result<(), ChannelError>;

    /// Stop receiving `destination`
    async fn unsubscribe(&mut self, destination: &str) -> Result<(), ChannelError>;

    /// Next message; `Ok(None)` once the peer closed the connection
    async fn next_frame(&mut self) -> Result<Option<InboundFrame>, ChannelError>;

    /// Send DISCONNECT and close the socket
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Bearer token plus the generation it was issued in
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Bearer token
    pub token: String,
    /// Incremented on every successful login or refresh
    pub generation: u64,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Supplies bearer credentials and recovers from 401 responses
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Current credential, refreshed first when close to expiry
    async fn credential(&self) -> Result<Credential, CallError>;

    /// Recover after a request carrying `generation` was rejected with 401.
    ///
    /// Concurrent callers share one refresh. Fails with
    /// [`CallError::RequiresLogin`] when the session cannot be recovered.
    async fn on_unauthorized(&self, generation: u64) -> Result<Credential, CallError>;

    /// Attach the bearer header to `request`
    async fn authorize(&self, request: ApiRequest) -> Result<(ApiRequest, u64), CallError> {
        let credential = self.credential().await?;
        Ok((request.with_bearer(credential.token), credential.generation))
    }
}
