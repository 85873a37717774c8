//! Identifier newtypes
//!
//! The dispatch backend hands out numeric identifiers. Each kind gets its own
//! type so a driver id can never be passed where a ride request id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Wrap a raw backend identifier
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Raw backend identifier
            pub const fn value(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

numeric_id!(
    /// Server-assigned ride request identifier
    RideRequestId
);
numeric_id!(
    /// Rider profile identifier
    RiderId
);
numeric_id!(
    /// Driver profile identifier
    DriverId
);
numeric_id!(
    /// Account identifier shared by both profiles of one user
    UserId
);

impl RideRequestId {
    /// Placeholder carried by a local draft before the server assigns an id
    pub const UNASSIGNED: Self = Self(0);

    /// Whether this is the draft placeholder
    pub const fn is_unassigned(self) -> bool {
        self.0 == 0
    }
}

/// Active profile of a logged-in account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Books rides
    Rider,
    /// Receives offers and drives
    Driver,
}

impl Profile {
    /// Wire name used by the backend
    pub const fn as_str(self) -> &'static str {
        match self {
            Profile::Rider => "rider",
            Profile::Driver => "driver",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rider" => Ok(Profile::Rider),
            "driver" => Ok(Profile::Driver),
            other => Err(format!("unknown profile '{other}', expected rider or driver")),
        }
    }
}
