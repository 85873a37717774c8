// Command modules for the CLI

/// Login, logout, profile switching and status
pub mod account;

/// Driver mode: offer feed and trip operations
pub mod drive;

/// Rider commands
pub mod ride;

use corider_core::{Location, RideOffer, RideRequest};

/// One-line summary of a ride request
pub fn describe(ride: &RideRequest) -> String {
    let driver = ride
        .driver_id
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    format!(
        "#{} {} v{} {} -> {} driver {}",
        ride.id,
        ride.state,
        ride.version,
        place(&ride.origin),
        place(&ride.destination),
        driver
    )
}

pub fn describe_offer(offer: &RideOffer) -> String {
    format!(
        "#{} {:?} {} -> {} until {}",
        offer.request_id,
        offer.kind,
        place(&offer.origin),
        place(&offer.destination),
        offer.expires_at.format("%H:%M:%S")
    )
}

fn place(location: &Location) -> String {
    match &location.label {
        Some(label) => label.clone(),
        None => format!("({:.5}, {:.5})", location.latitude, location.longitude),
    }
}

/// Parse `LAT,LON` or `LAT,LON,LABEL`
pub fn parse_location(text: &str) -> Result<Location, String> {
    let mut parts = text.splitn(3, ',');
    let latitude = coordinate(parts.next(), "latitude", 90.0)?;
    let longitude = coordinate(parts.next(), "longitude", 180.0)?;
    Ok(match parts.next().map(str::trim).filter(|l| !l.is_empty()) {
        Some(label) => Location::labelled(latitude, longitude, label),
        None => Location::new(latitude, longitude),
    })
}

fn coordinate(part: Option<&str>, name: &str, bound: f64) -> Result<f64, String> {
    let part = part.ok_or_else(|| format!("missing {name}, expected LAT,LON[,LABEL]"))?;
    let value: f64 = part
        .trim()
        .parse()
        .map_err(|_| format!("invalid {name} '{}'", part.trim()))?;
    if !(-bound..=bound).contains(&value) {
        return Err(format!("{name} {value} out of range"));
    }
    Ok(value)
}
