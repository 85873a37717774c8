//! Rider commands
//!
//! `request` and `track` follow the ride until it terminates or the user
//! interrupts; the process exit does not cancel anything server-side.

use super::{describe, parse_location};
use crate::client::Client;
use anyhow::Result;
use clap::Subcommand;
use corider_core::{Location, NewRideRequest, RideRequestId};
use corider_dispatch::{RideUpdate, RiderRide};
use futures::StreamExt;
use tracing::debug;

#[derive(Subcommand, Debug)]
pub enum RideCommand {
    /// Request a ride and follow it
    Request {
        /// Pickup as LAT,LON[,LABEL]
        #[arg(long, value_parser = parse_location)]
        from: Location,

        /// Drop-off as LAT,LON[,LABEL]
        #[arg(long, value_parser = parse_location)]
        to: Location,

        /// Note for the driver
        #[arg(long)]
        note: Option<String>,

        /// Return once the request is broadcast instead of following it
        #[arg(long)]
        detach: bool,
    },
    /// Follow an existing request
    Track { id: RideRequestId },
    /// Cancel a request that has not started yet
    Cancel { id: RideRequestId },
    /// List this rider's requests
    List,
}

pub async fn run(client: &Client, command: RideCommand) -> Result<()> {
    match command {
        RideCommand::Request {
            from,
            to,
            note,
            detach,
        } => {
            let mut new = NewRideRequest::new(from, to);
            if let Some(note) = note {
                new = new.with_note(note);
            }
            let ride = client.dispatch.request_ride(new).await?;
            println!("Requested {}", describe(&ride.snapshot()));
            if !detach {
                follow(ride).await;
            }
        }
        RideCommand::Track { id } => {
            let ride = client.dispatch.track_ride(id).await?;
            println!("Tracking {}", describe(&ride.snapshot()));
            follow(ride).await;
        }
        RideCommand::Cancel { id } => {
            let ride = client.dispatch.track_ride(id).await?;
            let cancelled = ride.cancel().await?;
            println!("Cancelled {}", describe(&cancelled));
        }
        RideCommand::List => {
            let rides = client.dispatch.my_rides().await?;
            if rides.is_empty() {
                println!("No ride requests");
            }
            for ride in rides {
                println!("{}", describe(&ride));
            }
        }
    }
    Ok(())
}

/// Print updates until the ride terminates or Ctrl-C
async fn follow(mut ride: RiderRide) {
    loop {
        tokio::select! {
            update = ride.next() => match update {
                Some(RideUpdate::Changed(snapshot)) => println!("{}", describe(&snapshot)),
                Some(RideUpdate::Suspended) => {
                    println!("Session expired; run `corider login` and track the ride again");
                }
                Some(RideUpdate::Resumed) => println!("Session restored"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                debug!(request_id = %ride.id(), "Interrupted");
                break;
            }
        }
    }
}
