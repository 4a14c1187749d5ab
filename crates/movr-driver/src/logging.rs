use colored::ColoredString;
use env_logger::Env;
use log::{warn, Level, Record};
use std::io::Write;

/// Filter used when `RUST_LOG` is not set. The database client crates log
/// every prepared statement below `WARN`.
const DEFAULT_FILTER: &str = "info,tokio_postgres=warn,deadpool=warn";

/// Starts the driver's logger on stderr, which keeps stdout for the latency
/// reports.
///
/// `RUST_LOG=debug` adds a line per ride and `RUST_LOG=trace` a line per
/// transaction attempt. Those lines also name the module they come from.
pub fn init_logging(name: ColoredString) {
    if env_logger::Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER))
        .format(move |buf, record| {
            let t = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "{t} {level_style}{:<5}{level_style:#} {name}{} {}",
                record.level(),
                origin(record),
                record.args()
            )
        })
        .try_init()
        .is_err()
    {
        warn!("The driver's logger was already set, keeping it")
    }
}

/// ` (module)` suffix of the logger name for per-ride and per-attempt lines.
fn origin(record: &Record<'_>) -> String {
    match record.level() {
        Level::Debug | Level::Trace => format!(" ({})", record.target()),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::origin;
    use log::{Level, Record};

    #[test]
    fn detailed_lines_name_their_module() {
        let record = Record::builder()
            .args(format_args!("ride"))
            .level(Level::Debug)
            .target("movr_driver::workload")
            .build();
        assert_eq!(origin(&record), " (movr_driver::workload)");

        let record = Record::builder()
            .args(format_args!("ride"))
            .level(Level::Info)
            .target("movr_driver::workload")
            .build();
        assert_eq!(origin(&record), "");
    }
}
