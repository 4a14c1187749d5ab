use crate::db::executor::TransactionExecutor;
use crate::db::storage::Storage;
use crate::db::types::ride::RideId;
use crate::db::types::user::UserId;
use crate::db::types::vehicle::VehicleId;
use crate::workload::error::WorkloadError;
use chrono::{DateTime, Utc};
use log::info;
use rand::Rng;

/// Users and vehicles the workload picks from, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorPool {
    users: Vec<UserId>,
    vehicles: Vec<VehicleId>,
}

impl ActorPool {
    pub fn new(users: Vec<UserId>, vehicles: Vec<VehicleId>) -> Result<Self, WorkloadError> {
        if users.is_empty() {
            return Err(WorkloadError::EmptyActorPool { actor: "users" });
        }
        if vehicles.is_empty() {
            return Err(WorkloadError::EmptyActorPool { actor: "vehicles" });
        }
        Ok(Self { users, vehicles })
    }

    /// Reads all user and vehicle identifiers from `storage`.
    pub async fn load<S: Storage>(
        storage: &S,
        executor: &TransactionExecutor,
    ) -> Result<Self, WorkloadError> {
        let users = executor
            .run(storage, |txn| Box::pin(async move { txn.get_users().await }))
            .await?;
        info!("{} users found", users.len());
        let vehicles = executor
            .run(storage, |txn| Box::pin(async move { txn.get_vehicles().await }))
            .await?;
        info!("{} vehicles found", vehicles.len());
        Self::new(users, vehicles)
    }

    pub fn users(&self) -> &[UserId] {
        &self.users
    }

    pub fn vehicles(&self) -> &[VehicleId] {
        &self.vehicles
    }

    /// Uniformly random user and vehicle.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> (UserId, VehicleId) {
        let user = self.users[rng.gen_range(0..self.users.len())];
        let vehicle = self.vehicles[rng.gen_range(0..self.vehicles.len())];
        (user, vehicle)
    }
}

/// One ride driven through its whole lifecycle by a single iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RideSession {
    pub ride_id: RideId,
    pub start_time: DateTime<Utc>,
    pub user_id: UserId,
    pub vehicle_id: VehicleId,
    pub city: String,
}

impl RideSession {
    pub fn begin<R: Rng + ?Sized>(actors: &ActorPool, city: &str, rng: &mut R) -> Self {
        let (user_id, vehicle_id) = actors.pick(rng);
        Self {
            ride_id: RideId::generate(),
            start_time: Utc::now(),
            user_id,
            vehicle_id,
            city: city.to_string(),
        }
    }
}

/// Random vehicle position in whole degrees.
///
/// Both coordinates are drawn from `[-180, 180]`, so latitudes outside the
/// valid `[-90, 90]` range do occur.
pub fn random_position<R: Rng + ?Sized>(rng: &mut R) -> (f64, f64) {
    let lat = rng.gen_range(-180i32..=180);
    let long = rng.gen_range(-180i32..=180);
    (f64::from(lat), f64::from(long))
}
