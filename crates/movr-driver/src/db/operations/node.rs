use crate::db::error::DBError;
use crate::db::types::node::NodeInfo;
use deadpool_postgres::Transaction;

/// Retrieves the identity of the gateway node serving this connection.
pub(crate) async fn get_node_info(txn: &Transaction<'_>) -> Result<NodeInfo, DBError> {
    let stmt = txn
        .prepare_cached(
            "SELECT n.node_id, n.address
             FROM crdb_internal.gossip_nodes AS n
             WHERE n.node_id = crdb_internal.node_id()",
        )
        .await?;
    let row = txn
        .query_opt(&stmt, &[])
        .await?
        .ok_or_else(|| {
            DBError::invalid_data("gateway node is not listed among the gossip nodes".to_string())
        })?;
    Ok(NodeInfo {
        node_id: row.get(0),
        address: row.get(1),
    })
}
