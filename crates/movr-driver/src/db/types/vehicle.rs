use crate::db::error::DBError;
use std::fmt;
use std::fmt::Display;
use uuid::Uuid;

/// Vehicle identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct VehicleId(pub Uuid);
impl Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Availability of a vehicle.
///
/// The workload only ever moves a vehicle between [`VehicleStatus::Available`]
/// and [`VehicleStatus::InUse`]; `lost` exists in the dataset and is accepted
/// when reading rows back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VehicleStatus {
    Available,
    InUse,
    Lost,
}

impl TryFrom<String> for VehicleStatus {
    type Error = DBError;
    fn try_from(value: String) -> Result<Self, DBError> {
        match value.as_str() {
            "available" => Ok(Self::Available),
            "in_use" => Ok(Self::InUse),
            "lost" => Ok(Self::Lost),
            _ => Err(DBError::invalid_vehicle_status(value)),
        }
    }
}

impl From<VehicleStatus> for &'static str {
    fn from(val: VehicleStatus) -> Self {
        match val {
            VehicleStatus::Available => "available",
            VehicleStatus::InUse => "in_use",
            VehicleStatus::Lost => "lost",
        }
    }
}

impl Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let status: &'static str = (*self).into();
        write!(f, "{status}")
    }
}

/// A vehicle as stored in the `vehicles` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vehicle {
    pub id: VehicleId,
    pub city: String,
    pub vehicle_type: String,
    pub status: VehicleStatus,
}
