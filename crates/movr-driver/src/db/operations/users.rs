use crate::db::error::DBError;
use crate::db::types::user::{User, UserId};
use deadpool_postgres::Transaction;
use tokio_postgres::Row;

fn row_to_user(row: &Row) -> User {
    User {
        id: UserId(row.get(0)),
        city: row.get(1),
        name: row.get(2),
    }
}

pub(crate) async fn get_user(txn: &Transaction<'_>, user_id: UserId) -> Result<User, DBError> {
    let stmt = txn
        .prepare_cached(
            "SELECT u.id, u.city, u.name
             FROM users AS u
             WHERE u.id = $1",
        )
        .await?;
    let row = txn
        .query_opt(&stmt, &[&user_id.0])
        .await?
        .ok_or(DBError::UnknownUser { user_id })?;
    Ok(row_to_user(&row))
}

/// Retrieves the identifiers of all users, ordered by identifier.
pub(crate) async fn get_users(txn: &Transaction<'_>) -> Result<Vec<UserId>, DBError> {
    let stmt = txn
        .prepare_cached("SELECT u.id FROM users AS u ORDER BY u.id ASC")
        .await?;
    let rows: Vec<Row> = txn.query(&stmt, &[]).await?;
    Ok(rows.iter().map(|row| UserId(row.get(0))).collect())
}
