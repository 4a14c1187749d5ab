pub mod config;
pub mod db;
pub mod logging;
pub mod metrics;
pub mod stats;
pub mod workload;
