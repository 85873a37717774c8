//! Shared harness: logged-in clients against one in-memory backend

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use corider_core::{Clock, Profile, RideRequest};
use corider_dispatch::{DispatchConfig, DispatchCoordinator, OfferUpdate, RideUpdate};
use corider_session::{SessionConfig, SessionManager};
use corider_testkit::*;
use corider_transport::{Authorizer, ChannelConnector, RestTransport, TransportAdapter};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// One device: session, transport and dispatch coordinator
pub struct Client {
    pub session: Arc<SessionManager>,
    pub transport: TransportAdapter,
    pub dispatch: DispatchCoordinator,
}

impl Client {
    pub async fn login(server: &FakeDispatchServer, email: &str, profile: Profile) -> Self {
        init_test_tracing();
        let session = Arc::new(SessionManager::new(
            Arc::new(server.clone()) as Arc<dyn RestTransport>,
            server.clock() as Arc<dyn Clock>,
            SessionConfig::default(),
        ));
        session.login(email, PASSWORD, profile).await.unwrap();

        let transport = TransportAdapter::new(
            Arc::new(server.clone()) as Arc<dyn RestTransport>,
            Arc::new(server.clone()) as Arc<dyn ChannelConnector>,
            Arc::clone(&session) as Arc<dyn Authorizer>,
            &fast_transport_config(),
        );
        let dispatch = DispatchCoordinator::new(
            transport.clone(),
            session.watch(),
            server.clock() as Arc<dyn Clock>,
            DispatchConfig::default(),
        );
        Self {
            session,
            transport,
            dispatch,
        }
    }

    pub async fn rider(server: &FakeDispatchServer) -> Self {
        Self::login(server, RIDER_EMAIL, Profile::Rider).await
    }

    pub async fn driver(server: &FakeDispatchServer, email: &str) -> Self {
        Self::login(server, email, Profile::Driver).await
    }

    pub fn shutdown(&self) {
        self.dispatch.shutdown();
        self.transport.shutdown();
    }
}

/// Poll `check` until it holds
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting until {what}");
}

/// Next snapshot from a ride stream, skipping suspension markers
pub async fn next_change<S>(updates: &mut S) -> RideRequest
where
    S: Stream<Item = RideUpdate> + Unpin,
{
    loop {
        let update = tokio::time::timeout(Duration::from_secs(5), updates.next())
            .await
            .expect("ride update in time");
        match update {
            Some(RideUpdate::Changed(ride)) => return ride,
            Some(_) => continue,
            None => panic!("ride stream ended"),
        }
    }
}

pub async fn next_update<S>(updates: &mut S) -> Option<RideUpdate>
where
    S: Stream<Item = RideUpdate> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(5), updates.next())
        .await
        .expect("ride update in time")
}

pub async fn next_offer<S>(feed: &mut S) -> OfferUpdate
where
    S: Stream<Item = OfferUpdate> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .expect("offer in time")
        .expect("feed open")
}
