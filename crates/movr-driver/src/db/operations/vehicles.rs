use crate::db::error::DBError;
use crate::db::types::vehicle::{Vehicle, VehicleId, VehicleStatus};
use deadpool_postgres::Transaction;
use tokio_postgres::Row;

fn row_to_vehicle(row: &Row) -> Result<Vehicle, DBError> {
    assert_eq!(row.len(), 4);
    Ok(Vehicle {
        id: VehicleId(row.get(0)),
        city: row.get(1),
        vehicle_type: row.get(2),
        status: row.get::<_, String>(3).try_into()?,
    })
}

pub(crate) async fn get_vehicle(
    txn: &Transaction<'_>,
    vehicle_id: VehicleId,
) -> Result<Vehicle, DBError> {
    let stmt = txn
        .prepare_cached(
            "SELECT v.id, v.city, v.type, v.status
             FROM vehicles AS v
             WHERE v.id = $1",
        )
        .await?;
    let row = txn
        .query_opt(&stmt, &[&vehicle_id.0])
        .await?
        .ok_or(DBError::UnknownVehicle { vehicle_id })?;
    row_to_vehicle(&row)
}

/// Retrieves the identifiers of all vehicles, ordered by identifier.
pub(crate) async fn get_vehicles(txn: &Transaction<'_>) -> Result<Vec<VehicleId>, DBError> {
    let stmt = txn
        .prepare_cached("SELECT v.id FROM vehicles AS v ORDER BY v.id ASC")
        .await?;
    let rows: Vec<Row> = txn.query(&stmt, &[]).await?;
    Ok(rows.iter().map(|row| VehicleId(row.get(0))).collect())
}

/// Sets the vehicle status. Setting the status it already has is not an error.
pub(crate) async fn update_vehicle_status(
    txn: &Transaction<'_>,
    vehicle_id: VehicleId,
    status: VehicleStatus,
) -> Result<(), DBError> {
    let stmt = txn
        .prepare_cached("UPDATE vehicles SET status = $2 WHERE id = $1")
        .await?;
    let status_str: &'static str = status.into();
    let modified_rows = txn.execute(&stmt, &[&vehicle_id.0, &status_str]).await?;
    if modified_rows > 0 {
        Ok(())
    } else {
        Err(DBError::UnknownVehicle { vehicle_id })
    }
}
