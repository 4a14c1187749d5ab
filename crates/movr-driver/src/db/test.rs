//! In-memory implementation of [`Storage`] used by the tests.
//!
//! Every transaction works on a private copy of the tables which replaces the
//! shared tables when it commits, so a failed attempt leaves nothing behind.
//! Faults can be scripted per operation name (or `"commit"`) to simulate
//! conflicts reported by the database. Follower reads can be made to lag
//! behind, in which case rides started within the lag are not visible to them.

use crate::db::error::DBError;
use crate::db::executor::{RetryPolicy, TransactionExecutor};
use crate::db::operations::RideTransaction;
use crate::db::storage::Storage;
use crate::db::types::location::{LocationId, VehicleLocation};
use crate::db::types::node::NodeInfo;
use crate::db::types::ride::{RideId, RideSummary};
use crate::db::types::user::{User, UserId};
use crate::db::types::vehicle::{Vehicle, VehicleId, VehicleStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Failure injected into an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Serialization failure, as reported with SQLSTATE 40001.
    Conflict,
    /// A failure that retrying does not resolve.
    Fatal,
}

impl Fault {
    fn to_error(self, operation: &str) -> DBError {
        match self {
            Fault::Conflict => DBError::transaction_conflict(format!(
                "restart transaction: injected conflict in {operation}"
            )),
            Fault::Fatal => DBError::invalid_data(format!("injected failure in {operation}")),
        }
    }
}

#[derive(Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    vehicles: BTreeMap<VehicleId, Vehicle>,
    rides: BTreeMap<RideId, RideSummary>,
    locations: BTreeMap<LocationId, VehicleLocation>,
}

struct ScriptedFault {
    operation: String,
    fault: Fault,
    remaining: usize,
}

#[derive(Default)]
struct Inner {
    tables: Tables,
    node: NodeInfo,
    follower_lag: Option<Duration>,
    faults: Vec<ScriptedFault>,
    attempts: usize,
    commits: usize,
    calls: Vec<String>,
}

impl Inner {
    fn take_fault(&mut self, operation: &str) -> Option<Fault> {
        let scripted = self
            .faults
            .iter_mut()
            .find(|f| f.operation == operation && f.remaining > 0)?;
        scripted.remaining -= 1;
        Some(scripted.fault)
    }
}

pub(crate) struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    /// Storage with `users` users and `vehicles` available vehicles, with
    /// identifiers in ascending order.
    pub(crate) fn with_fleet(users: u128, vehicles: u128) -> Self {
        let mut tables = Tables::default();
        for i in 0..users {
            let id = UserId(Uuid::from_u128(0x1000 + i));
            tables.users.insert(
                id,
                User {
                    id,
                    city: "San Francisco".to_string(),
                    name: format!("rider-{i}"),
                },
            );
        }
        for i in 0..vehicles {
            let id = VehicleId(Uuid::from_u128(0x2000 + i));
            tables.vehicles.insert(
                id,
                Vehicle {
                    id,
                    city: "San Francisco".to_string(),
                    vehicle_type: "scooter".to_string(),
                    status: VehicleStatus::Available,
                },
            );
        }
        Self {
            inner: Mutex::new(Inner {
                tables,
                node: NodeInfo::new(1, "127.0.0.1:26257"),
                ..Inner::default()
            }),
        }
    }

    /// Makes the next `times` calls of `operation` fail with `fault`.
    pub(crate) fn inject(&self, operation: &str, fault: Fault, times: usize) {
        self.inner.lock().unwrap().faults.push(ScriptedFault {
            operation: operation.to_string(),
            fault,
            remaining: times,
        });
    }

    /// Hides rides started less than `lag` ago from follower reads.
    pub(crate) fn set_follower_lag(&self, lag: Duration) {
        self.inner.lock().unwrap().follower_lag = Some(lag);
    }

    pub(crate) fn set_node(&self, node: NodeInfo) {
        self.inner.lock().unwrap().node = node;
    }

    /// Number of transactions started.
    pub(crate) fn attempts(&self) -> usize {
        self.inner.lock().unwrap().attempts
    }

    /// Number of transactions committed.
    pub(crate) fn commits(&self) -> usize {
        self.inner.lock().unwrap().commits
    }

    /// Names of the operations called so far, including failed attempts.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub(crate) fn user_ids(&self) -> Vec<UserId> {
        self.inner.lock().unwrap().tables.users.keys().copied().collect()
    }

    pub(crate) fn vehicle_ids(&self) -> Vec<VehicleId> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .vehicles
            .keys()
            .copied()
            .collect()
    }

    pub(crate) fn vehicle_status(&self, vehicle_id: VehicleId) -> Option<VehicleStatus> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .vehicles
            .get(&vehicle_id)
            .map(|v| v.status)
    }

    pub(crate) fn ride(&self, ride_id: RideId) -> Option<RideSummary> {
        self.inner.lock().unwrap().tables.rides.get(&ride_id).cloned()
    }

    pub(crate) fn rides(&self) -> Vec<RideSummary> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .rides
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn ride_count(&self) -> usize {
        self.inner.lock().unwrap().tables.rides.len()
    }

    pub(crate) fn location_count(&self) -> usize {
        self.inner.lock().unwrap().tables.locations.len()
    }

    fn begin(&self) -> MemoryTransaction<'_> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;
        MemoryTransaction {
            storage: self,
            staged: Mutex::new(Staged {
                tables: inner.tables.clone(),
                statements: 0,
            }),
        }
    }

    fn commit(&self, txn: MemoryTransaction<'_>) -> Result<(), DBError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push("commit".to_string());
        if let Some(fault) = inner.take_fault("commit") {
            return Err(fault.to_error("commit"));
        }
        inner.tables = txn.staged.into_inner().unwrap().tables;
        inner.commits += 1;
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn run_once<T, F>(&self, op: &F) -> Result<T, DBError>
    where
        T: Send,
        F: for<'t> Fn(&'t dyn RideTransaction) -> BoxFuture<'t, Result<T, DBError>>
            + Send
            + Sync,
    {
        let txn = self.begin();
        let handle: &dyn RideTransaction = &txn;
        let result = op(handle).await?;
        self.commit(txn)?;
        Ok(result)
    }

    async fn check_connection(&self) -> Result<(), DBError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.take_fault("check_connection") {
            Some(fault) => Err(fault.to_error("check_connection")),
            None => Ok(()),
        }
    }
}

struct Staged {
    tables: Tables,
    statements: usize,
}

struct MemoryTransaction<'a> {
    storage: &'a MemoryStorage,
    staged: Mutex<Staged>,
}

impl MemoryTransaction<'_> {
    /// Records the statement and fails it if a fault is scripted for it.
    fn statement(&self, operation: &str) -> Result<(), DBError> {
        self.staged.lock().unwrap().statements += 1;
        let mut inner = self.storage.inner.lock().unwrap();
        inner.calls.push(operation.to_string());
        match inner.take_fault(operation) {
            Some(fault) => Err(fault.to_error(operation)),
            None => Ok(()),
        }
    }

    fn ride_summary(&self, ride_id: RideId) -> Result<RideSummary, DBError> {
        self.staged
            .lock()
            .unwrap()
            .tables
            .rides
            .get(&ride_id)
            .cloned()
            .ok_or(DBError::UnknownRide { ride_id })
    }
}

#[async_trait]
impl<'a> RideTransaction for MemoryTransaction<'a> {
    async fn get_node_info(&self) -> Result<NodeInfo, DBError> {
        self.statement("get_node_info")?;
        Ok(self.storage.inner.lock().unwrap().node.clone())
    }

    async fn get_user(&self, user_id: UserId) -> Result<User, DBError> {
        self.statement("get_user")?;
        self.staged
            .lock()
            .unwrap()
            .tables
            .users
            .get(&user_id)
            .cloned()
            .ok_or(DBError::UnknownUser { user_id })
    }

    async fn get_vehicle(&self, vehicle_id: VehicleId) -> Result<Vehicle, DBError> {
        self.statement("get_vehicle")?;
        self.staged
            .lock()
            .unwrap()
            .tables
            .vehicles
            .get(&vehicle_id)
            .cloned()
            .ok_or(DBError::UnknownVehicle { vehicle_id })
    }

    async fn get_users(&self) -> Result<Vec<UserId>, DBError> {
        self.statement("get_users")?;
        Ok(self.staged.lock().unwrap().tables.users.keys().copied().collect())
    }

    async fn get_vehicles(&self) -> Result<Vec<VehicleId>, DBError> {
        self.statement("get_vehicles")?;
        Ok(self
            .staged
            .lock()
            .unwrap()
            .tables
            .vehicles
            .keys()
            .copied()
            .collect())
    }

    async fn start_ride(
        &self,
        ride_id: RideId,
        user_id: UserId,
        start_time: DateTime<Utc>,
        vehicle_id: VehicleId,
        city: &str,
    ) -> Result<RideId, DBError> {
        self.statement("start_ride")?;
        let mut staged = self.staged.lock().unwrap();
        if staged.tables.rides.contains_key(&ride_id) {
            return Err(DBError::unique_key_violation("rides_pkey"));
        }
        staged.tables.rides.insert(
            ride_id,
            RideSummary {
                id: ride_id,
                rider_id: user_id,
                vehicle_id,
                city: city.to_string(),
                start_time,
                end_time: None,
            },
        );
        Ok(ride_id)
    }

    async fn add_vehicle_location_history(
        &self,
        ride_id: RideId,
        seen_time: DateTime<Utc>,
        lat: f64,
        long: f64,
    ) -> Result<LocationId, DBError> {
        self.statement("add_vehicle_location_history")?;
        let location_id = LocationId(Uuid::new_v4());
        self.staged.lock().unwrap().tables.locations.insert(
            location_id,
            VehicleLocation {
                id: location_id,
                ride_id,
                timestamp: seen_time,
                lat,
                long,
            },
        );
        Ok(location_id)
    }

    async fn read_vehicle_last_location(
        &self,
        location_id: LocationId,
    ) -> Result<VehicleLocation, DBError> {
        self.statement("read_vehicle_last_location")?;
        self.staged
            .lock()
            .unwrap()
            .tables
            .locations
            .get(&location_id)
            .cloned()
            .ok_or(DBError::UnknownLocation { location_id })
    }

    async fn update_vehicle_status(
        &self,
        vehicle_id: VehicleId,
        status: VehicleStatus,
    ) -> Result<(), DBError> {
        self.statement("update_vehicle_status")?;
        let mut staged = self.staged.lock().unwrap();
        let vehicle = staged
            .tables
            .vehicles
            .get_mut(&vehicle_id)
            .ok_or(DBError::UnknownVehicle { vehicle_id })?;
        vehicle.status = status;
        Ok(())
    }

    async fn end_ride(&self, ride_id: RideId, end_time: DateTime<Utc>) -> Result<(), DBError> {
        self.statement("end_ride")?;
        let mut staged = self.staged.lock().unwrap();
        let ride = staged
            .tables
            .rides
            .get_mut(&ride_id)
            .ok_or(DBError::UnknownRide { ride_id })?;
        if ride.end_time.is_some() {
            return Err(DBError::RideAlreadyEnded { ride_id });
        }
        ride.end_time = Some(end_time);
        Ok(())
    }

    async fn read_ride_info(&self, ride_id: RideId) -> Result<RideSummary, DBError> {
        self.statement("read_ride_info")?;
        self.ride_summary(ride_id)
    }

    async fn read_ride_info_aost(
        &self,
        ride_id: RideId,
    ) -> Result<Option<RideSummary>, DBError> {
        if self.staged.lock().unwrap().statements > 0 {
            return Err(DBError::invalid_data(
                "AS OF SYSTEM TIME must be the first statement of the transaction".to_string(),
            ));
        }
        self.statement("read_ride_info_aost")?;
        let lag = self.storage.inner.lock().unwrap().follower_lag;
        let ride = self.staged.lock().unwrap().tables.rides.get(&ride_id).cloned();
        Ok(ride.filter(|ride| match lag {
            Some(lag) => ride.start_time <= Utc::now() - lag,
            None => true,
        }))
    }
}

fn single_attempt() -> TransactionExecutor {
    TransactionExecutor::new(
        RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        },
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn failed_attempts_leave_no_trace() {
    let storage = MemoryStorage::with_fleet(1, 1);
    let user_id = storage.user_ids()[0];
    let vehicle_id = storage.vehicle_ids()[0];
    let ride_id = RideId::generate();
    storage.inject("update_vehicle_status", Fault::Fatal, 1);

    let result = single_attempt()
        .run(&storage, |txn| {
            Box::pin(async move {
                txn.start_ride(ride_id, user_id, Utc::now(), vehicle_id, "Oslo")
                    .await?;
                txn.update_vehicle_status(vehicle_id, VehicleStatus::InUse)
                    .await
            })
        })
        .await;
    assert!(matches!(result, Err(DBError::InvalidData { .. })));
    assert!(storage.ride(ride_id).is_none());
    assert_eq!(storage.commits(), 0);
    assert_eq!(
        storage.calls(),
        vec!["start_ride".to_string(), "update_vehicle_status".to_string()]
    );
}

#[tokio::test]
async fn stale_read_must_come_first() {
    let storage = MemoryStorage::with_fleet(1, 1);
    let vehicle_id = storage.vehicle_ids()[0];
    let ride_id = RideId::generate();
    let result = single_attempt()
        .run(&storage, |txn| {
            Box::pin(async move {
                txn.get_vehicle(vehicle_id).await?;
                txn.read_ride_info_aost(ride_id).await
            })
        })
        .await;
    assert!(matches!(result, Err(DBError::InvalidData { .. })));
}

#[tokio::test]
async fn lagging_follower_read_misses_fresh_rides() {
    let storage = MemoryStorage::with_fleet(1, 1);
    let user_id = storage.user_ids()[0];
    let vehicle_id = storage.vehicle_ids()[0];
    let old_ride = RideId::generate();
    let fresh_ride = RideId::generate();
    single_attempt()
        .run(&storage, |txn| {
            Box::pin(async move {
                let an_hour_ago = Utc::now() - Duration::hours(1);
                txn.start_ride(old_ride, user_id, an_hour_ago, vehicle_id, "Oslo")
                    .await?;
                txn.start_ride(fresh_ride, user_id, Utc::now(), vehicle_id, "Oslo")
                    .await
            })
        })
        .await
        .unwrap();
    storage.set_follower_lag(Duration::seconds(5));

    let executor = single_attempt();
    let old = executor
        .run(&storage, |txn| {
            Box::pin(async move { txn.read_ride_info_aost(old_ride).await })
        })
        .await
        .unwrap();
    assert_eq!(old, storage.ride(old_ride));
    let fresh = executor
        .run(&storage, |txn| {
            Box::pin(async move { txn.read_ride_info_aost(fresh_ride).await })
        })
        .await
        .unwrap();
    assert_eq!(fresh, None);
}
