use crate::db::types::location::LocationId;
use crate::db::types::ride::RideId;
use crate::db::types::user::UserId;
use crate::db::types::vehicle::VehicleId;
use deadpool_postgres::PoolError;
use openssl::error::ErrorStack;
use std::{backtrace::Backtrace, error::Error as StdError, fmt, fmt::Display};
use tokio_postgres::error::{Error as PgError, SqlState};

#[derive(Debug)]
#[non_exhaustive]
pub enum DBError {
    PostgresError {
        error: Box<PgError>,
        backtrace: Backtrace,
    },
    PostgresPoolError {
        error: Box<PoolError>,
        backtrace: Backtrace,
    },
    PoolConfiguration {
        error: String,
    },
    // The database aborted the transaction because it could not be serialized
    // with a concurrent one (SQLSTATE 40001). The whole transaction may be retried.
    TransactionConflict {
        message: String,
        backtrace: Backtrace,
    },
    // Catch-all error for unexpected invalid data extracted from the database.
    InvalidData {
        error: String,
        backtrace: Backtrace,
    },
    InvalidVehicleStatus {
        status: String,
        backtrace: Backtrace,
    },
    UniqueKeyViolation {
        constraint: String,
        backtrace: Backtrace,
    },
    TlsConnection {
        hint: String,
        openssl_error: Option<ErrorStack>,
    },
    UnknownUser {
        user_id: UserId,
    },
    UnknownVehicle {
        vehicle_id: VehicleId,
    },
    UnknownRide {
        ride_id: RideId,
    },
    UnknownLocation {
        location_id: LocationId,
    },
    RideAlreadyEnded {
        ride_id: RideId,
    },
    // The retry wait was interrupted by shutdown.
    Cancelled,
}

impl DBError {
    pub fn transaction_conflict(message: impl Into<String>) -> Self {
        Self::TransactionConflict {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }
    pub fn invalid_data(error: String) -> Self {
        Self::InvalidData {
            error,
            backtrace: Backtrace::capture(),
        }
    }
    pub fn invalid_vehicle_status(status: String) -> Self {
        Self::InvalidVehicleStatus {
            status,
            backtrace: Backtrace::capture(),
        }
    }
    pub fn unique_key_violation(constraint: impl Into<String>) -> Self {
        Self::UniqueKeyViolation {
            constraint: constraint.into(),
            backtrace: Backtrace::capture(),
        }
    }

    /// Whether rerunning the whole transaction can succeed.
    ///
    /// Only serialization conflicts qualify. Constraint violations, missing
    /// rows and connectivity failures stay the same on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionConflict { .. })
    }

    /// Short, stable name of the error kind for logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PostgresError { .. } => "PostgresError",
            Self::PostgresPoolError { .. } => "PostgresPoolError",
            Self::PoolConfiguration { .. } => "PoolConfiguration",
            Self::TransactionConflict { .. } => "TransactionConflict",
            Self::InvalidData { .. } => "InvalidData",
            Self::InvalidVehicleStatus { .. } => "InvalidVehicleStatus",
            Self::UniqueKeyViolation { .. } => "UniqueKeyViolation",
            Self::TlsConnection { .. } => "TlsConnection",
            Self::UnknownUser { .. } => "UnknownUser",
            Self::UnknownVehicle { .. } => "UnknownVehicle",
            Self::UnknownRide { .. } => "UnknownRide",
            Self::UnknownLocation { .. } => "UnknownLocation",
            Self::RideAlreadyEnded { .. } => "RideAlreadyEnded",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl From<PgError> for DBError {
    fn from(error: PgError) -> Self {
        if error.code() == Some(&SqlState::T_R_SERIALIZATION_FAILURE) {
            let message = error
                .as_db_error()
                .map(|db_err| db_err.message().to_string())
                .unwrap_or_else(|| error.to_string());
            return Self::transaction_conflict(message);
        }
        Self::PostgresError {
            error: Box::new(error),
            backtrace: Backtrace::capture(),
        }
    }
}

impl From<PoolError> for DBError {
    fn from(error: PoolError) -> Self {
        Self::PostgresPoolError {
            error: Box::new(error),
            backtrace: Backtrace::capture(),
        }
    }
}

impl Display for DBError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DBError::PostgresError { error, .. } => {
                write!(f, "Unexpected Postgres error: '{error}'")
            }
            DBError::PostgresPoolError { error, .. } => {
                write!(f, "Postgres connection pool error: '{error}'")
            }
            DBError::PoolConfiguration { error } => {
                write!(f, "Unable to build the Postgres connection pool: '{error}'")
            }
            DBError::TransactionConflict { message, .. } => {
                write!(f, "Transaction conflict (retryable): '{message}'")
            }
            DBError::InvalidData { error, .. } => {
                write!(f, "Invalid database data '{error}'")
            }
            DBError::InvalidVehicleStatus { status, .. } => {
                write!(f, "Invalid vehicle status string '{status}'")
            }
            DBError::UniqueKeyViolation { constraint, .. } => {
                write!(f, "Unique key violation for '{constraint}'")
            }
            DBError::TlsConnection {
                hint,
                openssl_error,
            } => match openssl_error {
                Some(openssl_error) => write!(f, "{hint}: {openssl_error}"),
                None => write!(f, "{hint}"),
            },
            DBError::UnknownUser { user_id } => {
                write!(f, "Unknown user id '{user_id}'")
            }
            DBError::UnknownVehicle { vehicle_id } => {
                write!(f, "Unknown vehicle id '{vehicle_id}'")
            }
            DBError::UnknownRide { ride_id } => {
                write!(f, "Unknown ride id '{ride_id}'")
            }
            DBError::UnknownLocation { location_id } => {
                write!(f, "Unknown vehicle location id '{location_id}'")
            }
            DBError::RideAlreadyEnded { ride_id } => {
                write!(f, "Ride '{ride_id}' has already ended")
            }
            DBError::Cancelled => {
                write!(f, "Transaction retry was cancelled by shutdown")
            }
        }
    }
}

impl StdError for DBError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            DBError::PostgresError { error, .. } => Some(&**error),
            DBError::PostgresPoolError { error, .. } => Some(&**error),
            DBError::TlsConnection {
                openssl_error: Some(error),
                ..
            } => Some(error),
            _ => None,
        }
    }
}
