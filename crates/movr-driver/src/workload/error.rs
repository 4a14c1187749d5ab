use crate::db::error::DBError;
use crate::stats::OperationCategory;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("The database has no {actor}, the workload needs at least one user and one vehicle")]
    EmptyActorPool { actor: &'static str },

    #[error("Step '{step}' kept conflicting until its retries were exhausted: {source}")]
    RetriesExhausted {
        step: OperationCategory,
        #[source]
        source: DBError,
    },

    #[error("Workload stopped by shutdown")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    WorkerTask(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Database(DBError),
}

impl From<DBError> for WorkloadError {
    fn from(error: DBError) -> Self {
        match error {
            DBError::Cancelled => WorkloadError::Cancelled,
            error => WorkloadError::Database(error),
        }
    }
}

impl WorkloadError {
    /// Classifies the failure of the executor call of `step`.
    pub(crate) fn from_step(step: OperationCategory, error: DBError) -> Self {
        if error.is_retryable() {
            WorkloadError::RetriesExhausted {
                step,
                source: error,
            }
        } else {
            WorkloadError::from(error)
        }
    }
}
