pub mod error;
pub mod executor;
pub mod operations;
pub mod storage;
pub mod storage_postgres;
#[cfg(test)]
pub(crate) mod test;
pub mod types;
