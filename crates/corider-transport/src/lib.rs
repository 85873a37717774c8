//! # Corider Transport
//!
//! Everything between the dispatch coordinator and the network:
//!
//! - [`TransportAdapter`]: authorized REST calls with 401 recovery and retries,
//!   plus queue subscriptions on the shared push channel
//! - [`ChannelHandle`]: background actor owning the STOMP connection, with
//!   reconnect backoff, endpoint fallback and resync markers
//! - Seams ([`RestTransport`], [`ChannelConnector`], [`Authorizer`]) and their
//!   production implementations ([`HttpRestTransport`], [`StompConnector`])

pub mod adapter;
pub mod backoff;
pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod request;
pub mod stomp;
pub mod traits;
pub mod websocket;

pub use adapter::TransportAdapter;
pub use backoff::BackoffPolicy;
pub use channel::{ChannelHandle, ChannelMessage, ChannelState, Subscription};
pub use config::{
    RetryPolicy, TransportConfig, DRIVER_QUEUE, FALLBACK_CHANNEL_ENDPOINTS,
    PRIMARY_CHANNEL_ENDPOINT, RIDER_QUEUE,
};
pub use error::{
    ApiErrorBody, CallError, ChannelError, StompError, TransportError, TransportErrorKind,
};
pub use http::HttpRestTransport;
pub use request::{ApiRequest, ApiResponse, Method};
pub use stomp::{StompCommand, StompFrame};
pub use traits::{
    Authorizer, ChannelConnection, ChannelConnector, Credential, InboundFrame, RestTransport,
};
pub use websocket::StompConnector;
