//! Push channel actor
//!
//! A single background task owns the channel connection. Callers subscribe to
//! queue destinations and receive a [`Subscription`] stream; the actor fans
//! decoded [`ChannelEvent`]s out to every subscriber of the destination.
//!
//! On connection loss the actor reconnects with jittered exponential backoff,
//! trying the endpoint that last worked before walking the configured list,
//! re-subscribes every active destination and then pushes
//! [`ChannelMessage::Resync`] to every subscriber so they re-fetch
//! authoritative state.

use crate::backoff::BackoffPolicy;
use crate::error::ChannelError;
use crate::traits::{Authorizer, ChannelConnection, ChannelConnector, InboundFrame};
use corider_core::ChannelEvent;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// Item yielded by a [`Subscription`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// Decoded event for the subscribed destination
    Event(ChannelEvent),
    /// Connection was re-established; events may have been missed
    Resync,
}

/// Connection status published by the actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// No subscribers yet
    Idle,
    /// Handshake in progress
    Connecting,
    /// Handshake completed
    Connected {
        /// Full URL of the endpoint in use
        endpoint: String,
    },
    /// Waiting out a backoff delay
    Reconnecting {
        /// Failed attempts since the last healthy connection
        attempt: u32,
    },
    /// Actor stopped; subscriptions have ended
    Closed,
}

enum Command {
    Subscribe {
        id: u64,
        destination: String,
        sender: mpsc::UnboundedSender<ChannelMessage>,
    },
    Unsubscribe {
        id: u64,
        destination: String,
    },
    Shutdown,
}

/// Cloneable handle to the channel actor
#[derive(Clone)]
pub struct ChannelHandle {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    state: watch::Receiver<ChannelState>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ChannelHandle {
    /// Spawn the actor on the current tokio runtime.
    ///
    /// The actor connects lazily on the first subscription. `endpoints` are
    /// full WebSocket URLs, primary first.
    pub fn spawn(
        connector: Arc<dyn ChannelConnector>,
        authorizer: Arc<dyn Authorizer>,
        endpoints: Vec<String>,
        backoff: BackoffPolicy,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ChannelState::Idle);
        let actor = ChannelActor {
            connector,
            authorizer,
            endpoints,
            backoff,
            sticky: None,
            subscribers: HashMap::new(),
            commands: receiver,
            state: state_tx,
            ever_connected: false,
        };
        tokio::spawn(actor.run());
        Self {
            commands,
            next_id: Arc::new(AtomicU64::new(0)),
            state,
        }
    }

    /// Subscribe to `destination`; the stream ends when the actor shuts down
    pub fn subscribe(&self, destination: &str) -> Result<Subscription, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.commands
            .send(Command::Subscribe {
                id,
                destination: destination.to_string(),
                sender,
            })
            .map_err(|_| ChannelError::Closed)?;
        Ok(Subscription {
            id,
            destination: destination.to_string(),
            inner: UnboundedReceiverStream::new(receiver),
            commands: self.commands.clone(),
        })
    }

    /// Current connection status
    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Watch connection status changes
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Close the connection and end every subscription stream
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Stream of messages for one destination.
///
/// Dropping the subscription unsubscribes and discards undelivered messages.
pub struct Subscription {
    id: u64,
    destination: String,
    inner: UnboundedReceiverStream<ChannelMessage>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    /// Queue destination this subscription drains
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Explicit form of dropping the handle
    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish()
    }
}

impl Stream for Subscription {
    type Item = ChannelMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe {
            id: self.id,
            destination: std::mem::take(&mut self.destination),
        });
    }
}

/// A connection that stays up this long resets the backoff without a frame
const STABLE_UPTIME: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct ChannelActor {
    connector: Arc<dyn ChannelConnector>,
    authorizer: Arc<dyn Authorizer>,
    endpoints: Vec<String>,
    backoff: BackoffPolicy,
    /// Endpoint of the last successful handshake
    sticky: Option<String>,
    /// destination -> subscriber id -> sender
    subscribers: HashMap<String, HashMap<u64, mpsc::UnboundedSender<ChannelMessage>>>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ChannelState>,
    ever_connected: bool,
}

impl ChannelActor {
    async fn run(mut self) {
        let mut connection: Option<Box<dyn ChannelConnection>> = None;
        let mut attempt: u32 = 0;
        // Set once the current connection delivered a frame
        let mut healthy = false;
        let mut since = Instant::now();

        loop {
            let Some(conn) = connection.as_mut() else {
                if self.subscribers.is_empty() {
                    let _ = self.state.send(ChannelState::Idle);
                    match self.commands.recv().await {
                        Some(command) => {
                            if self.apply_offline(command) == Flow::Stop {
                                break;
                            }
                            continue;
                        }
                        None => break,
                    }
                }

                match self.establish().await {
                    Ok(conn) => {
                        if self.ever_connected {
                            info!("Channel reconnected, requesting resync");
                            self.broadcast(&ChannelMessage::Resync);
                        }
                        self.ever_connected = true;
                        healthy = false;
                        since = Instant::now();
                        connection = Some(conn);
                    }
                    Err(err) => {
                        warn!(attempt, error = %err, "Channel connection failed, backing off");
                        if self.back_off(&mut attempt).await == Flow::Stop {
                            break;
                        }
                    }
                }
                continue;
            };

            let lost = tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        let _ = conn.close().await;
                        break;
                    };
                    match self.apply_online(conn.as_mut(), command).await {
                        Ok(Flow::Continue) => false,
                        Ok(Flow::Stop) => {
                            if let Err(err) = conn.close().await {
                                debug!(error = %err, "Channel close failed");
                            }
                            break;
                        }
                        Err(err) => {
                            warn!(error = %err, "Channel write failed, reconnecting");
                            true
                        }
                    }
                }
                frame = conn.next_frame() => match frame {
                    Ok(Some(frame)) => {
                        healthy = true;
                        self.route(frame);
                        false
                    }
                    Ok(None) => {
                        warn!("Channel closed by peer, reconnecting");
                        true
                    }
                    Err(err) => {
                        warn!(error = %err, "Channel connection lost, reconnecting");
                        true
                    }
                }
            };
            if !lost {
                continue;
            }

            connection = None;
            if healthy || since.elapsed() >= STABLE_UPTIME {
                attempt = 0;
            }
            if self.back_off(&mut attempt).await == Flow::Stop {
                break;
            }
        }

        self.subscribers.clear();
        let _ = self.state.send(ChannelState::Closed);
        debug!("Channel actor stopped");
    }

    /// Publish `Reconnecting` and sleep out the delay for `attempt`
    async fn back_off(&mut self, attempt: &mut u32) -> Flow {
        let delay = self.backoff.delay(*attempt);
        *attempt = attempt.saturating_add(1);
        debug!(
            attempt = *attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Channel reconnect scheduled"
        );
        let _ = self.state.send(ChannelState::Reconnecting { attempt: *attempt });
        self.wait_offline(delay).await
    }

    /// Candidate endpoints: the sticky one first, then the configured order
    fn candidates(&self) -> Vec<String> {
        let mut candidates = Vec::with_capacity(self.endpoints.len() + 1);
        if let Some(sticky) = &self.sticky {
            candidates.push(sticky.clone());
        }
        candidates.extend(
            self.endpoints
                .iter()
                .filter(|e| Some(*e) != self.sticky.as_ref())
                .cloned(),
        );
        candidates
    }

    async fn establish(&mut self) -> Result<Box<dyn ChannelConnection>, ChannelError> {
        let _ = self.state.send(ChannelState::Connecting);
        let credential = self
            .authorizer
            .credential()
            .await
            .map_err(|e| ChannelError::rejected(e.to_string()))?;

        let mut last_error = ChannelError::Closed;
        for endpoint in self.candidates() {
            match self.connector.connect(&endpoint, &credential.token).await {
                Ok(mut conn) => {
                    for destination in self.subscribers.keys() {
                        conn.subscribe(destination).await?;
                    }
                    if self.sticky.as_deref() != Some(endpoint.as_str()) {
                        info!(endpoint = %endpoint, "Channel endpoint selected");
                    }
                    self.sticky = Some(endpoint.clone());
                    let _ = self.state.send(ChannelState::Connected { endpoint });
                    return Ok(conn);
                }
                Err(ChannelError::Rejected { message }) => {
                    // Broker refused the credential; refresh before the next attempt.
                    debug!(endpoint = %endpoint, message = %message, "Channel credential rejected");
                    if let Err(err) = self.authorizer.on_unauthorized(credential.generation).await {
                        warn!(error = %err, "Channel credential refresh failed");
                    }
                    return Err(ChannelError::Rejected { message });
                }
                Err(err) => {
                    debug!(endpoint = %endpoint, error = %err, "Channel endpoint failed");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Sleep out a backoff delay while still serving commands
    async fn wait_offline(&mut self, delay: Duration) -> Flow {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Flow::Continue,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.apply_offline(command) == Flow::Stop {
                            return Flow::Stop;
                        }
                    }
                    None => return Flow::Stop,
                }
            }
        }
    }

    fn apply_offline(&mut self, command: Command) -> Flow {
        match command {
            Command::Subscribe {
                id,
                destination,
                sender,
            } => {
                self.add_subscriber(id, destination, sender);
                Flow::Continue
            }
            Command::Unsubscribe { id, destination } => {
                self.remove_subscriber(id, &destination);
                Flow::Continue
            }
            Command::Shutdown => Flow::Stop,
        }
    }

    async fn apply_online(
        &mut self,
        conn: &mut dyn ChannelConnection,
        command: Command,
    ) -> Result<Flow, ChannelError> {
        match command {
            Command::Subscribe {
                id,
                destination,
                sender,
            } => {
                if self.add_subscriber(id, destination.clone(), sender) {
                    conn.subscribe(&destination).await?;
                }
                Ok(Flow::Continue)
            }
            Command::Unsubscribe { id, destination } => {
                if self.remove_subscriber(id, &destination) {
                    conn.unsubscribe(&destination).await?;
                }
                Ok(Flow::Continue)
            }
            Command::Shutdown => Ok(Flow::Stop),
        }
    }

    /// Returns true when this is the first subscriber of `destination`
    fn add_subscriber(
        &mut self,
        id: u64,
        destination: String,
        sender: mpsc::UnboundedSender<ChannelMessage>,
    ) -> bool {
        debug!(destination = %destination, subscriber = id, "Subscribing");
        let entry = self.subscribers.entry(destination).or_default();
        let first = entry.is_empty();
        entry.insert(id, sender);
        first
    }

    /// Returns true when `destination` has no subscribers left
    fn remove_subscriber(&mut self, id: u64, destination: &str) -> bool {
        let Some(entry) = self.subscribers.get_mut(destination) else {
            return false;
        };
        if entry.remove(&id).is_none() {
            return false;
        }
        debug!(destination, subscriber = id, "Unsubscribed");
        if entry.is_empty() {
            self.subscribers.remove(destination);
            true
        } else {
            false
        }
    }

    fn route(&mut self, frame: InboundFrame) {
        let event = match serde_json::from_str::<ChannelEvent>(&frame.body) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    destination = %frame.destination,
                    error = %err,
                    "Dropping undecodable channel message"
                );
                return;
            }
        };
        let Some(entry) = self.subscribers.get_mut(&frame.destination) else {
            debug!(destination = %frame.destination, "No subscriber for channel message");
            return;
        };
        debug!(
            destination = %frame.destination,
            request_id = %event.request_id(),
            sequence = event.sequence(),
            kind = %event.kind(),
            "Channel event received"
        );
        let message = ChannelMessage::Event(event);
        entry.retain(|_, sender| sender.send(message.clone()).is_ok());
    }

    fn broadcast(&mut self, message: &ChannelMessage) {
        for entry in self.subscribers.values_mut() {
            entry.retain(|_, sender| sender.send(message.clone()).is_ok());
        }
    }
}
