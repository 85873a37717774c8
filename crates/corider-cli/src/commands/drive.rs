//! Driver mode
//!
//! Goes online, prints offers as they arrive and reads trip commands from
//! stdin, one per line:
//!
//! ```text
//! accept 12      reject 12      offers
//! confirm 12     start 12       complete 12     cancel 12
//! quit
//! ```

use super::{describe, describe_offer};
use crate::client::Client;
use anyhow::Result;
use corider_core::{RideOffer, RideRequestId};
use corider_dispatch::{DriverRide, OfferUpdate, RideUpdate};
use futures::StreamExt;
use std::collections::BTreeMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept(RideRequestId),
    Reject(RideRequestId),
    Confirm(RideRequestId),
    Start(RideRequestId),
    Complete(RideRequestId),
    Cancel(RideRequestId),
    Offers,
    Quit,
}

impl Action {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| "empty command".to_string())?;
        let id = |words: &mut std::str::SplitWhitespace<'_>| -> Result<RideRequestId, String> {
            let raw = words
                .next()
                .ok_or_else(|| format!("`{verb}` needs a ride request id"))?;
            raw.parse().map_err(|_| format!("invalid ride request id '{raw}'"))
        };
        let action = match verb {
            "accept" => Self::Accept(id(&mut words)?),
            "reject" => Self::Reject(id(&mut words)?),
            "confirm" => Self::Confirm(id(&mut words)?),
            "start" => Self::Start(id(&mut words)?),
            "complete" => Self::Complete(id(&mut words)?),
            "cancel" => Self::Cancel(id(&mut words)?),
            "offers" => Self::Offers,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{other}'")),
        };
        if let Some(extra) = words.next() {
            return Err(format!("unexpected argument '{extra}'"));
        }
        Ok(action)
    }
}

/// Open offers and won trips of one driving session
#[derive(Default)]
struct Shift {
    offers: BTreeMap<RideRequestId, RideOffer>,
    trips: StreamMap<RideRequestId, DriverRide>,
}

impl Shift {
    fn trip(&self, id: RideRequestId) -> Result<&DriverRide, String> {
        self.trips
            .iter()
            .find_map(|(key, trip)| (*key == id).then_some(trip))
            .ok_or_else(|| format!("no active trip #{id}"))
    }
}

pub async fn run(client: &Client) -> Result<()> {
    let mut feed = client.dispatch.go_online()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shift = Shift::default();
    println!("Online; waiting for offers");

    loop {
        tokio::select! {
            offer = feed.next() => match offer {
                Some(OfferUpdate::Offered(offer)) => {
                    println!("Offer {}", describe_offer(&offer));
                    shift.offers.insert(offer.request_id, offer);
                }
                Some(OfferUpdate::Withdrawn { request_id, reason }) => {
                    println!("Offer #{request_id} withdrawn: {reason:?}");
                    shift.offers.remove(&request_id);
                }
                None => {
                    println!("Offer feed closed");
                    break;
                }
            },
            Some((id, update)) = shift.trips.next(), if !shift.trips.is_empty() => match update {
                RideUpdate::Changed(ride) => println!("Trip {}", describe(&ride)),
                RideUpdate::Suspended => println!("Trip #{id} suspended; log in again"),
                RideUpdate::Resumed => println!("Trip #{id} resumed"),
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Action::parse(&line) {
                    Ok(Action::Quit) => break,
                    Ok(action) => {
                        if let Err(message) = perform(client, &mut shift, action).await {
                            println!("{message}");
                        }
                    }
                    Err(message) => println!("{message}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.dispatch.go_offline();
    debug!(trips = shift.trips.len(), "Went offline");
    Ok(())
}

async fn perform(client: &Client, shift: &mut Shift, action: Action) -> Result<(), String> {
    let outcome = match action {
        Action::Accept(id) => {
            shift.offers.remove(&id);
            let trip = client
                .dispatch
                .accept(id)
                .await
                .map_err(|e| e.to_string())?;
            println!("Won {}", describe(&trip.snapshot()));
            shift.trips.insert(id, trip);
            return Ok(());
        }
        Action::Reject(id) => {
            shift.offers.remove(&id);
            client
                .dispatch
                .reject(id)
                .await
                .map_err(|e| e.to_string())?;
            println!("Declined #{id}");
            return Ok(());
        }
        Action::Confirm(id) => shift.trip(id)?.confirm().await,
        Action::Start(id) => shift.trip(id)?.start().await,
        Action::Complete(id) => shift.trip(id)?.complete().await,
        Action::Cancel(id) => shift.trip(id)?.cancel().await,
        Action::Offers => {
            if shift.offers.is_empty() {
                println!("No open offers");
            }
            for offer in shift.offers.values() {
                println!("Offer {}", describe_offer(offer));
            }
            return Ok(());
        }
        Action::Quit => return Ok(()),
    };
    match outcome {
        Ok(ride) => {
            println!("Trip {}", describe(&ride));
            Ok(())
        }
        Err(err) => {
            warn!(error = %err, "Trip operation failed");
            Err(err.to_string())
        }
    }
}
