use crate::db::error::DBError;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_postgres::error::Error as PgError;

/// Converts the Postgres error into our `DBError`.
/// If the underlying Postgres error is a unique constraint violation,
/// it is mapped to [`DBError::UniqueKeyViolation`] carrying the constraint name.
pub(crate) fn maybe_unique_violation(err: PgError) -> DBError {
    if let Some(db_err) = err.as_db_error() {
        if db_err.code() == &tokio_postgres::error::SqlState::UNIQUE_VIOLATION {
            return DBError::unique_key_violation(db_err.constraint().unwrap_or("unknown"));
        }
    }
    // Serialization failures, network, parsing, TLS, I/O, timeouts etc.
    DBError::from(err)
}

/// The ride tables use `TIMESTAMP` columns which hold UTC wall-clock time.
pub(crate) fn to_column_timestamp(ts: DateTime<Utc>) -> NaiveDateTime {
    ts.naive_utc()
}

pub(crate) fn from_column_timestamp(ts: NaiveDateTime) -> DateTime<Utc> {
    ts.and_utc()
}
