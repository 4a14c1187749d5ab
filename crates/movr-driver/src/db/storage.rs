use crate::db::error::DBError;
use crate::db::operations::RideTransaction;
use async_trait::async_trait;
use futures_util::future::BoxFuture;

/// A source of transactions against the ride-sharing database.
///
/// Implementations only run a single attempt; retrying on conflicts is the
/// job of the [`TransactionExecutor`](crate::db::executor::TransactionExecutor).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Opens a transaction, runs `op` in it and commits.
    ///
    /// If `op` fails, the transaction is rolled back and the error of `op` is
    /// returned. A failed commit returns the commit error; nothing of the
    /// attempt is visible afterwards.
    async fn run_once<T, F>(&self, op: &F) -> Result<T, DBError>
    where
        T: Send,
        F: for<'t> Fn(&'t dyn RideTransaction) -> BoxFuture<'t, Result<T, DBError>>
            + Send
            + Sync;

    /// Checks that the database can be reached.
    async fn check_connection(&self) -> Result<(), DBError>;
}
