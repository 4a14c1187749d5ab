use crate::db::error::DBError;
use deadpool_postgres::Transaction;
use tokio_postgres::error::{Error as PgError, SqlState};

/// Tables the ride lifecycle reads and writes.
const MOVR_TABLES: [&str; 4] =
    ["users", "vehicles", "rides", "vehicle_location_histories"];

fn table_check_query(table: &str) -> String {
    format!("SELECT 1 FROM {table} LIMIT 1")
}

fn missing_table(table: &str, err: PgError) -> DBError {
    if err.code() == Some(&SqlState::UNDEFINED_TABLE) {
        return DBError::invalid_data(format!(
            "table '{table}' does not exist, load the MovR dataset before running the driver"
        ));
    }
    DBError::from(err)
}

/// Startup check of the pool: a connection can be made and every MovR table
/// is readable through it. Makes no writes.
pub(crate) async fn check_connection(txn: &Transaction<'_>) -> Result<(), DBError> {
    for table in MOVR_TABLES {
        txn.query_opt(&table_check_query(table), &[])
            .await
            .map_err(|e| missing_table(table, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{table_check_query, MOVR_TABLES};

    #[test]
    fn every_ride_table_is_checked() {
        assert_eq!(
            MOVR_TABLES.map(table_check_query),
            [
                "SELECT 1 FROM users LIMIT 1",
                "SELECT 1 FROM vehicles LIMIT 1",
                "SELECT 1 FROM rides LIMIT 1",
                "SELECT 1 FROM vehicle_location_histories LIMIT 1",
            ]
        );
    }
}
