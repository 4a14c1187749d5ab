use crate::db::error::DBError;
use crate::db::executor::RetryPolicy;
use clap::Parser;
use log::warn;
use openssl::ssl::{SslConnector, SslFiletype, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Once;
use std::time::Duration;
use tokio_postgres::config::SslMode;

/// Local insecure single-node cluster with the demo database.
fn default_db_connection_string() -> String {
    "postgresql://root@127.0.0.1:26257/movr_demo?application_name=movr_demo".to_string()
}

/// Default city label of the rides started by the workload.
fn default_city() -> String {
    "San Francisco".to_string()
}

/// TLS behavior of the database connections, named after the libpq `sslmode` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DbSslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// Encrypt, but only verify the server certificate if a root certificate is given.
    /// The server hostname is never verified.
    Require,
    /// Encrypt and verify both the server certificate and its hostname.
    VerifyFull,
}

impl std::fmt::Display for DbSslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            DbSslMode::Disable => write!(f, "disable"),
            DbSslMode::Require => write!(f, "require"),
            DbSslMode::VerifyFull => write!(f, "verify-full"),
        }
    }
}

/// Database configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct DatabaseConfig {
    /// Connection string of the database under test, e.g.
    /// `postgresql://<user>@<host>:26257/movr_demo`. The `cockroachdb://`
    /// scheme is accepted as an alias of `postgresql://`.
    #[arg(long, env = "DB_URI", default_value_t = default_db_connection_string())]
    pub db_connection_string: String,

    /// Overrides the user of the connection string.
    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    /// Maximum number of pooled connections.
    #[arg(long, default_value_t = 16)]
    pub db_pool_size: usize,

    /// TLS mode of the connections.
    #[arg(long, env = "DB_SSLMODE", value_enum, default_value_t = DbSslMode::Disable)]
    pub db_ssl_mode: DbSslMode,

    /// CA certificate used to verify the server certificate.
    #[arg(long, env = "DB_SSLROOTCERT")]
    pub db_ssl_root_cert: Option<String>,

    /// Client certificate presented to the server.
    #[arg(long, env = "DB_SSLCERT")]
    pub db_ssl_cert: Option<String>,

    /// Private key of the client certificate.
    #[arg(long, env = "DB_SSLKEY")]
    pub db_ssl_key: Option<String>,
}

impl DatabaseConfig {
    pub fn new(db_connection_string: String) -> Self {
        Self {
            db_connection_string,
            db_user: None,
            db_pool_size: 16,
            db_ssl_mode: DbSslMode::Disable,
            db_ssl_root_cert: None,
            db_ssl_cert: None,
            db_ssl_key: None,
        }
    }

    /// Database connection string with the `cockroachdb://` alias resolved.
    fn database_connection_string(&self) -> String {
        match self.db_connection_string.strip_prefix("cockroachdb://") {
            Some(rest) => format!("postgresql://{rest}"),
            None => self.db_connection_string.clone(),
        }
    }

    pub(crate) fn tokio_postgres_config(&self) -> Result<tokio_postgres::Config, DBError> {
        let mut config = self
            .database_connection_string()
            .parse::<tokio_postgres::Config>()?;
        if let Some(user) = &self.db_user {
            config.user(user);
        }
        if self.db_ssl_mode != DbSslMode::Disable {
            config.ssl_mode(SslMode::Require);
        }
        Ok(config)
    }

    /// Builds the TLS connector, or `None` if TLS is disabled.
    pub(crate) fn tls_connector(&self) -> Result<Option<MakeTlsConnector>, DBError> {
        if self.db_ssl_mode == DbSslMode::Disable {
            return Ok(None);
        }
        let tls_error = |hint: String| {
            move |e| DBError::TlsConnection {
                hint,
                openssl_error: Some(e),
            }
        };

        let mut builder = SslConnector::builder(SslMethod::tls()).map_err(tls_error(
            "Unable to build TLS connector to connect to the database".to_string(),
        ))?;

        if let Some(ca_path) = &self.db_ssl_root_cert {
            builder
                .set_ca_file(ca_path)
                .map_err(tls_error(format!(
                    "Unable to load the root certificate at {ca_path:?}"
                )))?;
        } else if self.db_ssl_mode == DbSslMode::Require {
            static ONCE: Once = Once::new();
            ONCE.call_once(|| {
                warn!("No root certificate given: the database server certificate is not verified.");
            });
            builder.set_verify(SslVerifyMode::NONE);
        }

        if let Some(cert_path) = &self.db_ssl_cert {
            builder
                .set_certificate_file(cert_path, SslFiletype::PEM)
                .map_err(tls_error(format!(
                    "Unable to load the client certificate at {cert_path:?}"
                )))?;
        }
        if let Some(key_path) = &self.db_ssl_key {
            builder
                .set_private_key_file(key_path, SslFiletype::PEM)
                .map_err(tls_error(format!(
                    "Unable to load the client key at {key_path:?}"
                )))?;
        }

        let mut connector = MakeTlsConnector::new(builder.build());
        if self.db_ssl_mode == DbSslMode::Require {
            connector.set_callback(|ctx, _| {
                ctx.set_verify_hostname(false);
                Ok(())
            });
        }
        Ok(Some(connector))
    }
}

/// What to do with an iteration whose transaction kept conflicting until
/// the retry budget was spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OnExhausted {
    /// Stop the workload and exit with an error.
    #[default]
    Abort,
    /// Log the failed iteration, release its vehicle and continue with the next one.
    Skip,
}

impl std::fmt::Display for OnExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            OnExhausted::Abort => write!(f, "abort"),
            OnExhausted::Skip => write!(f, "skip"),
        }
    }
}

/// Workload loop configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct WorkloadConfig {
    /// Seconds between two statistics reports.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub stats_interval_secs: u64,

    /// Location update and read cycles per ride.
    #[arg(long, default_value_t = 5)]
    pub updates_per_ride: usize,

    /// City of the rides started by the workload.
    #[arg(long, default_value_t = default_city())]
    pub city: String,

    /// Number of concurrent ride loops.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub workers: u32,

    /// Seed of the random actor and location choices. Random if not set.
    #[arg(long, env = "MOVR_SEED")]
    pub seed: Option<u64>,

    /// Handling of iterations whose retries were exhausted.
    #[arg(long, value_enum, default_value_t = OnExhausted::Abort)]
    pub on_exhausted: OnExhausted,

    /// Rides each worker completes before stopping. Runs until interrupted if not set.
    #[arg(long)]
    pub rides: Option<u64>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: 5,
            updates_per_ride: 5,
            city: default_city(),
            workers: 1,
            seed: None,
            on_exhausted: OnExhausted::Abort,
            rides: None,
        }
    }
}

impl WorkloadConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

/// Transaction retry configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct RetryConfig {
    /// Attempts of a transaction before a conflict is reported as a failure.
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Upper bound of the first backoff, in milliseconds.
    #[arg(long, default_value_t = 10)]
    pub initial_backoff_ms: u64,

    /// Upper bound of any backoff, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..RetryPolicy::default()
        }
    }
}

/// Prometheus exporter configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct MetricsConfig {
    /// Address the metrics scrape endpoint binds to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub metrics_address: IpAddr,

    /// Port of the metrics scrape endpoint.
    #[arg(long, default_value_t = 8000)]
    pub metrics_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cockroachdb_scheme_is_an_alias() {
        let config = DatabaseConfig::new(
            "cockroachdb://bob@db.example.com:26257/movr_demo?application_name=movr_demo"
                .to_string(),
        );
        let pg_config = config.tokio_postgres_config().unwrap();
        assert_eq!(pg_config.get_user(), Some("bob"));
        assert_eq!(pg_config.get_dbname(), Some("movr_demo"));
        assert_eq!(pg_config.get_ports(), &[26257]);
        assert_eq!(pg_config.get_application_name(), Some("movr_demo"));
    }

    #[test]
    fn user_override_and_tls_mode() {
        let mut config = DatabaseConfig::new(default_db_connection_string());
        config.db_user = Some("alice".to_string());
        config.db_ssl_mode = DbSslMode::Require;
        let pg_config = config.tokio_postgres_config().unwrap();
        assert_eq!(pg_config.get_user(), Some("alice"));
        assert_eq!(pg_config.get_ssl_mode(), SslMode::Require);
        assert!(config.tls_connector().unwrap().is_some());

        config.db_ssl_mode = DbSslMode::Disable;
        assert!(config.tls_connector().unwrap().is_none());
    }

    #[test]
    fn missing_certificate_is_a_tls_error() {
        let mut config = DatabaseConfig::new(default_db_connection_string());
        config.db_ssl_mode = DbSslMode::VerifyFull;
        config.db_ssl_root_cert = Some("/nonexistent/ca.crt".to_string());
        assert!(matches!(
            config.tls_connector(),
            Err(DBError::TlsConnection { .. })
        ));
    }

    #[test]
    fn invalid_connection_string() {
        let config = DatabaseConfig::new("postgresql://host:notaport/db".to_string());
        assert!(config.tokio_postgres_config().is_err());
    }

    #[test]
    fn workload_and_retry_defaults() {
        let workload = WorkloadConfig::try_parse_from(["movr-driver"]).unwrap();
        assert_eq!(workload.stats_interval(), Duration::from_secs(5));
        assert_eq!(workload.updates_per_ride, 5);
        assert_eq!(workload.city, "San Francisco");
        assert_eq!(workload.workers, 1);
        assert_eq!(workload.on_exhausted, OnExhausted::Abort);

        let retry = RetryConfig::try_parse_from(["movr-driver", "--max-attempts", "3"]).unwrap();
        let policy = retry.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        assert_eq!(policy.max_backoff, Duration::from_secs(1));

        assert!(RetryConfig::try_parse_from(["movr-driver", "--max-attempts", "0"]).is_err());
        assert!(WorkloadConfig::try_parse_from(["movr-driver", "--on-exhausted", "skip"])
            .map(|c| c.on_exhausted == OnExhausted::Skip)
            .unwrap());
    }
}
