use crate::db::error::DBError;
use crate::db::operations::utils::{from_column_timestamp, to_column_timestamp};
use crate::db::types::location::{LocationId, VehicleLocation};
use crate::db::types::ride::RideId;
use chrono::{DateTime, Utc};
use deadpool_postgres::Transaction;

/// Records a vehicle position for the ride. The identifier is assigned by the database.
pub(crate) async fn add_vehicle_location_history(
    txn: &Transaction<'_>,
    ride_id: RideId,
    seen_time: DateTime<Utc>,
    lat: f64,
    long: f64,
) -> Result<LocationId, DBError> {
    let stmt = txn
        .prepare_cached(
            "INSERT INTO vehicle_location_histories (ride_id, timestamp, lat, long)
             VALUES ($1, $2, $3, $4)
             RETURNING id",
        )
        .await?;
    let row = txn
        .query_one(
            &stmt,
            &[&ride_id.0, &to_column_timestamp(seen_time), &lat, &long],
        )
        .await?;
    Ok(LocationId(row.get(0)))
}

pub(crate) async fn read_vehicle_last_location(
    txn: &Transaction<'_>,
    location_id: LocationId,
) -> Result<VehicleLocation, DBError> {
    let stmt = txn
        .prepare_cached(
            "SELECT h.id, h.ride_id, h.timestamp, h.lat, h.long
             FROM vehicle_location_histories AS h
             WHERE h.id = $1",
        )
        .await?;
    let row = txn
        .query_opt(&stmt, &[&location_id.0])
        .await?
        .ok_or(DBError::UnknownLocation { location_id })?;
    Ok(VehicleLocation {
        id: LocationId(row.get(0)),
        ride_id: RideId(row.get(1)),
        timestamp: from_column_timestamp(row.get(2)),
        lat: row.get(3),
        long: row.get(4),
    })
}
