use crate::config::DatabaseConfig;
use crate::db::error::DBError;
use crate::db::operations::{self, RideTransaction};
use crate::db::storage::Storage;
use crate::db::types::location::{LocationId, VehicleLocation};
use crate::db::types::node::NodeInfo;
use crate::db::types::ride::{RideId, RideSummary};
use crate::db::types::user::{User, UserId};
use crate::db::types::vehicle::{Vehicle, VehicleId, VehicleStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Transaction};
use futures_util::future::BoxFuture;
use log::{debug, info};
use tokio_postgres::NoTls;

/// Ride-sharing database reached through a pool of Postgres wire protocol
/// connections.
#[derive(Clone)]
pub struct StoragePostgres {
    pool: Pool,
}

impl StoragePostgres {
    /// Builds the connection pool and checks that a connection can be made.
    pub async fn connect(db_config: &DatabaseConfig) -> Result<Self, DBError> {
        let config = db_config.tokio_postgres_config()?;
        debug!("Opening connection pool to {:?}", config.get_hosts());
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = match db_config.tls_connector()? {
            Some(connector) => Manager::from_config(config, connector, mgr_config),
            None => Manager::from_config(config, NoTls, mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(db_config.db_pool_size)
            .build()
            .map_err(|e| DBError::PoolConfiguration {
                error: e.to_string(),
            })?;
        let storage = Self { pool };
        storage.check_connection().await?;
        info!(
            "Connection pool ready (up to {} connections, TLS {})",
            db_config.db_pool_size, db_config.db_ssl_mode
        );
        Ok(storage)
    }
}

#[async_trait]
impl Storage for StoragePostgres {
    async fn run_once<T, F>(&self, op: &F) -> Result<T, DBError>
    where
        T: Send,
        F: for<'t> Fn(&'t dyn RideTransaction) -> BoxFuture<'t, Result<T, DBError>>
            + Send
            + Sync,
    {
        let mut client = self.pool.get().await?;
        let txn = client.transaction().await?;
        let handle: &dyn RideTransaction = &txn;
        // Dropping `txn` without committing rolls it back.
        let result = op(handle).await?;
        txn.commit().await?;
        Ok(result)
    }

    async fn check_connection(&self) -> Result<(), DBError> {
        let mut client = self.pool.get().await?;
        let txn = client.transaction().await?;
        operations::connectivity::check_connection(&txn).await?;
        txn.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl<'c> RideTransaction for Transaction<'c> {
    async fn get_node_info(&self) -> Result<NodeInfo, DBError> {
        operations::node::get_node_info(self).await
    }

    async fn get_user(&self, user_id: UserId) -> Result<User, DBError> {
        operations::users::get_user(self, user_id).await
    }

    async fn get_vehicle(&self, vehicle_id: VehicleId) -> Result<Vehicle, DBError> {
        operations::vehicles::get_vehicle(self, vehicle_id).await
    }

    async fn get_users(&self) -> Result<Vec<UserId>, DBError> {
        operations::users::get_users(self).await
    }

    async fn get_vehicles(&self) -> Result<Vec<VehicleId>, DBError> {
        operations::vehicles::get_vehicles(self).await
    }

    async fn start_ride(
        &self,
        ride_id: RideId,
        user_id: UserId,
        start_time: DateTime<Utc>,
        vehicle_id: VehicleId,
        city: &str,
    ) -> Result<RideId, DBError> {
        operations::rides::start_ride(self, ride_id, user_id, start_time, vehicle_id, city).await
    }

    async fn add_vehicle_location_history(
        &self,
        ride_id: RideId,
        seen_time: DateTime<Utc>,
        lat: f64,
        long: f64,
    ) -> Result<LocationId, DBError> {
        operations::locations::add_vehicle_location_history(self, ride_id, seen_time, lat, long)
            .await
    }

    async fn read_vehicle_last_location(
        &self,
        location_id: LocationId,
    ) -> Result<VehicleLocation, DBError> {
        operations::locations::read_vehicle_last_location(self, location_id).await
    }

    async fn update_vehicle_status(
        &self,
        vehicle_id: VehicleId,
        status: VehicleStatus,
    ) -> Result<(), DBError> {
        operations::vehicles::update_vehicle_status(self, vehicle_id, status).await
    }

    async fn end_ride(&self, ride_id: RideId, end_time: DateTime<Utc>) -> Result<(), DBError> {
        operations::rides::end_ride(self, ride_id, end_time).await
    }

    async fn read_ride_info(&self, ride_id: RideId) -> Result<RideSummary, DBError> {
        operations::rides::read_ride_info(self, ride_id).await
    }

    async fn read_ride_info_aost(
        &self,
        ride_id: RideId,
    ) -> Result<Option<RideSummary>, DBError> {
        operations::rides::read_ride_info_aost(self, ride_id).await
    }
}
