use crate::db::types::user::UserId;
use crate::db::types::vehicle::VehicleId;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fmt::Display;
use uuid::Uuid;

/// Ride identifier. Generated by the client so that a retried insert
/// reuses the same key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct RideId(pub Uuid);
impl Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl RideId {
    /// Fresh random (v4) ride identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Summary of a ride as returned by the ride info reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RideSummary {
    pub id: RideId,
    pub rider_id: UserId,
    pub vehicle_id: VehicleId,
    pub city: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl RideSummary {
    /// Length of the ride, if it has ended.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}
