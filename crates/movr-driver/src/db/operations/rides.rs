use crate::db::error::DBError;
use crate::db::operations::utils::{
    from_column_timestamp, maybe_unique_violation, to_column_timestamp,
};
use crate::db::types::ride::{RideId, RideSummary};
use crate::db::types::user::UserId;
use crate::db::types::vehicle::VehicleId;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::Transaction;
use tokio_postgres::Row;

/// Columns of the ride summary.
const RETRIEVE_RIDE_SUMMARY_COLUMNS: &str =
    "r.id, r.rider_id, r.vehicle_id, r.city, r.start_time, r.end_time";

fn row_to_ride_summary(row: &Row) -> RideSummary {
    assert_eq!(row.len(), 6);
    RideSummary {
        id: RideId(row.get(0)),
        rider_id: UserId(row.get(1)),
        vehicle_id: VehicleId(row.get(2)),
        city: row.get(3),
        start_time: from_column_timestamp(row.get(4)),
        end_time: row
            .get::<_, Option<NaiveDateTime>>(5)
            .map(from_column_timestamp),
    }
}

pub(crate) async fn start_ride(
    txn: &Transaction<'_>,
    ride_id: RideId,
    user_id: UserId,
    start_time: DateTime<Utc>,
    vehicle_id: VehicleId,
    city: &str,
) -> Result<RideId, DBError> {
    let stmt = txn
        .prepare_cached(
            "INSERT INTO rides (id, city, vehicle_city, rider_id, vehicle_id, start_time)
             VALUES ($1, $2, $2, $3, $4, $5)",
        )
        .await?;
    txn.execute(
        &stmt,
        &[
            &ride_id.0,                       // $1: id
            &city,                            // $2: city, vehicle_city
            &user_id.0,                       // $3: rider_id
            &vehicle_id.0,                    // $4: vehicle_id
            &to_column_timestamp(start_time), // $5: start_time
        ],
    )
    .await
    .map_err(maybe_unique_violation)?;
    Ok(ride_id)
}

/// Sets the end time of a ride which has not yet ended.
pub(crate) async fn end_ride(
    txn: &Transaction<'_>,
    ride_id: RideId,
    end_time: DateTime<Utc>,
) -> Result<(), DBError> {
    let stmt = txn
        .prepare_cached("UPDATE rides SET end_time = $2 WHERE id = $1 AND end_time IS NULL")
        .await?;
    let modified_rows = txn
        .execute(&stmt, &[&ride_id.0, &to_column_timestamp(end_time)])
        .await?;
    if modified_rows > 0 {
        return Ok(());
    }

    // Either the ride does not exist or it was already ended
    let stmt = txn
        .prepare_cached("SELECT 1 FROM rides WHERE id = $1")
        .await?;
    if txn.query_opt(&stmt, &[&ride_id.0]).await?.is_some() {
        Err(DBError::RideAlreadyEnded { ride_id })
    } else {
        Err(DBError::UnknownRide { ride_id })
    }
}

async fn find_ride_info(
    txn: &Transaction<'_>,
    ride_id: RideId,
) -> Result<Option<RideSummary>, DBError> {
    let stmt = txn
        .prepare_cached(&format!(
            "SELECT {RETRIEVE_RIDE_SUMMARY_COLUMNS}
             FROM rides AS r
             WHERE r.id = $1"
        ))
        .await?;
    let row = txn.query_opt(&stmt, &[&ride_id.0]).await?;
    Ok(row.map(|row| row_to_ride_summary(&row)))
}

pub(crate) async fn read_ride_info(
    txn: &Transaction<'_>,
    ride_id: RideId,
) -> Result<RideSummary, DBError> {
    find_ride_info(txn, ride_id)
        .await?
        .ok_or(DBError::UnknownRide { ride_id })
}

/// Reads the ride summary as of the follower read timestamp, such that it can
/// be served by the nearest replica instead of the leaseholder.
///
/// That timestamp lags a few seconds behind, so a ride started just before
/// is usually not visible yet and `None` is returned.
/// Must be the first statement of its transaction.
pub(crate) async fn read_ride_info_aost(
    txn: &Transaction<'_>,
    ride_id: RideId,
) -> Result<Option<RideSummary>, DBError> {
    txn.batch_execute("SET TRANSACTION AS OF SYSTEM TIME follower_read_timestamp()")
        .await?;
    find_ride_info(txn, ride_id).await
}
