use crate::db::types::ride::RideId;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fmt::Display;
use uuid::Uuid;

/// Identifier of a row in the vehicle location history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct LocationId(pub Uuid);
impl Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single position reported by the vehicle during a ride.
#[derive(Clone, Debug, PartialEq)]
pub struct VehicleLocation {
    pub id: LocationId,
    pub ride_id: RideId,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub long: f64,
}
