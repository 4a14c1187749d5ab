use std::fmt;
use std::fmt::Display;

/// Identity of the database node that served a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct NodeInfo {
    pub node_id: i64,
    pub address: String,
}

impl NodeInfo {
    pub fn new(node_id: i64, address: impl Into<String>) -> Self {
        Self {
            node_id,
            address: address.into(),
        }
    }
}

impl Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} at {}", self.node_id, self.address)
    }
}
