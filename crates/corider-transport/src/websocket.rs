//! STOMP over WebSocket connector using tungstenite

use crate::config::TransportConfig;
use crate::error::{ChannelError, StompError};
use crate::stomp::{StompCommand, StompFrame};
use crate::traits::{ChannelConnection, ChannelConnector, InboundFrame};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`ChannelConnector`] speaking STOMP 1.2 in WebSocket text messages
#[derive(Debug, Clone)]
pub struct StompConnector {
    connect_timeout: Duration,
}

impl StompConnector {
    /// Connector using the configured handshake deadline
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
        }
    }

    async fn handshake(&self, endpoint: &str, bearer: &str) -> Result<WsStream, ChannelError> {
        let url = Url::parse(endpoint).map_err(|e| ChannelError::connect(endpoint, e))?;
        let host = url.host_str().unwrap_or("localhost").to_string();

        let (mut ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::connect(endpoint, e))?;

        ws.send(Message::Text(StompFrame::connect(&host, bearer).encode()))
            .await
            .map_err(|e| ChannelError::connect(endpoint, e))?;

        loop {
            let message = match ws.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(ChannelError::connect(endpoint, e)),
                None => return Err(ChannelError::connect(endpoint, "closed during handshake")),
            };
            let Some(frame) = decode_message(message)? else {
                continue;
            };
            match frame.command {
                StompCommand::Connected => return Ok(ws),
                StompCommand::Error => return Err(ChannelError::rejected(error_text(&frame))),
                other => {
                    return Err(ChannelError::connect(
                        endpoint,
                        format!("unexpected {} before CONNECTED", other.as_str()),
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl ChannelConnector for StompConnector {
    async fn connect(
        &self,
        endpoint: &str,
        bearer: &str,
    ) -> Result<Box<dyn ChannelConnection>, ChannelError> {
        let ws = timeout(self.connect_timeout, self.handshake(endpoint, bearer))
            .await
            .map_err(|_| ChannelError::Timeout {
                timeout_ms: u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
            })??;
        debug!(endpoint, "STOMP session established");
        Ok(Box::new(StompConnection {
            ws,
            subscriptions: HashMap::new(),
            next_id: 0,
        }))
    }
}

/// Established STOMP session
pub struct StompConnection {
    ws: WsStream,
    /// destination -> subscription id
    subscriptions: HashMap<String, String>,
    next_id: u64,
}

impl StompConnection {
    async fn send_frame(&mut self, frame: StompFrame) -> Result<(), ChannelError> {
        self.ws
            .send(Message::Text(frame.encode()))
            .await
            .map_err(ChannelError::lost)
    }
}

#[async_trait]
impl ChannelConnection for StompConnection {
    async fn subscribe(&mut self, destination: &str) -> Result<(), ChannelError> {
        if self.subscriptions.contains_key(destination) {
            return Ok(());
        }
        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;
        self.send_frame(StompFrame::subscribe(&id, destination)).await?;
        self.subscriptions.insert(destination.to_string(), id);
        Ok(())
    }

    async fn unsubscribe(&mut self, destination: &str) -> Result<(), ChannelError> {
        match self.subscriptions.remove(destination) {
            Some(id) => self.send_frame(StompFrame::unsubscribe(&id)).await,
            None => Ok(()),
        }
    }

    async fn next_frame(&mut self) -> Result<Option<InboundFrame>, ChannelError> {
        loop {
            let message = match self.ws.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(ChannelError::lost(e)),
                None => return Ok(None),
            };
            if matches!(message, Message::Close(_)) {
                return Ok(None);
            }
            let Some(frame) = decode_message(message)? else {
                continue;
            };
            match frame.command {
                StompCommand::Message => {
                    let destination = frame
                        .get("destination")
                        .ok_or(StompError::MissingHeader("destination"))?
                        .to_string();
                    return Ok(Some(InboundFrame {
                        destination,
                        body: frame.body,
                    }));
                }
                StompCommand::Error => return Err(ChannelError::rejected(error_text(&frame))),
                other => debug!(command = other.as_str(), "Ignoring STOMP frame"),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        if let Err(err) = self.send_frame(StompFrame::disconnect()).await {
            warn!(error = %err, "Failed to send STOMP DISCONNECT");
        }
        self.ws.close(None).await.map_err(ChannelError::lost)
    }
}

/// Decode one WebSocket message; control frames and heart-beats yield `None`
fn decode_message(message: Message) -> Result<Option<StompFrame>, ChannelError> {
    let text = match message {
        Message::Text(text) => text,
        Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => return Ok(None),
    };
    Ok(StompFrame::decode(&text)?)
}

fn error_text(frame: &StompFrame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.clone())
}
