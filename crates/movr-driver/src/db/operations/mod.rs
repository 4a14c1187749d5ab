//! Database operations of the ride-sharing workload.
//!
//! The submodules hold the SQL, written as free functions over a Postgres
//! [`Transaction`](deadpool_postgres::Transaction). [`RideTransaction`] is the
//! capability handed to an operation by the
//! [`TransactionExecutor`](crate::db::executor::TransactionExecutor): it is the
//! only way an operation can reach the database, and every call it makes runs
//! inside the same transaction.

use crate::db::error::DBError;
use crate::db::types::location::{LocationId, VehicleLocation};
use crate::db::types::node::NodeInfo;
use crate::db::types::ride::{RideId, RideSummary};
use crate::db::types::user::{User, UserId};
use crate::db::types::vehicle::{Vehicle, VehicleId, VehicleStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub(crate) mod connectivity;
pub(crate) mod locations;
pub(crate) mod node;
pub(crate) mod rides;
pub(crate) mod users;
pub(crate) mod utils;
pub(crate) mod vehicles;

/// A live transaction against the ride-sharing database.
///
/// An operation may be executed more than once when its transaction is
/// aborted by a conflict, so operations must not keep state between calls
/// beyond what they were given.
#[async_trait]
pub trait RideTransaction: Send + Sync {
    /// Identity of the node serving this transaction.
    async fn get_node_info(&self) -> Result<NodeInfo, DBError>;

    async fn get_user(&self, user_id: UserId) -> Result<User, DBError>;

    async fn get_vehicle(&self, vehicle_id: VehicleId) -> Result<Vehicle, DBError>;

    /// All user identifiers, in ascending order.
    async fn get_users(&self) -> Result<Vec<UserId>, DBError>;

    /// All vehicle identifiers, in ascending order.
    async fn get_vehicles(&self) -> Result<Vec<VehicleId>, DBError>;

    /// Inserts a new ride. The caller generates `ride_id`.
    async fn start_ride(
        &self,
        ride_id: RideId,
        user_id: UserId,
        start_time: DateTime<Utc>,
        vehicle_id: VehicleId,
        city: &str,
    ) -> Result<RideId, DBError>;

    async fn add_vehicle_location_history(
        &self,
        ride_id: RideId,
        seen_time: DateTime<Utc>,
        lat: f64,
        long: f64,
    ) -> Result<LocationId, DBError>;

    async fn read_vehicle_last_location(
        &self,
        location_id: LocationId,
    ) -> Result<VehicleLocation, DBError>;

    async fn update_vehicle_status(
        &self,
        vehicle_id: VehicleId,
        status: VehicleStatus,
    ) -> Result<(), DBError>;

    async fn end_ride(&self, ride_id: RideId, end_time: DateTime<Utc>) -> Result<(), DBError>;

    /// Strongly consistent read of the ride summary.
    async fn read_ride_info(&self, ride_id: RideId) -> Result<RideSummary, DBError>;

    /// Bounded-staleness read of the ride summary. Has to be the first
    /// operation of its transaction. `None` if the ride is not visible at the
    /// stale timestamp, which is the usual outcome for a ride started seconds
    /// ago.
    async fn read_ride_info_aost(
        &self,
        ride_id: RideId,
    ) -> Result<Option<RideSummary>, DBError>;
}
