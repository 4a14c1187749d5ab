//! Per-category latency accounting with a periodic text report.
//!
//! Workers call [`Stats::record`] once per completed operation. The reporting
//! side calls [`Stats::flush_if_due`], which takes the current window out
//! under the lock and leaves the rendering to the returned [`StatsReport`].

use crate::db::types::node::NodeInfo;
use std::fmt::{self, Display};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Kind of database operation a latency measurement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationCategory {
    ReadUser,
    ReadVehicle,
    UpdateVehicleStatus,
    InsertRide,
    InsertLocation,
    ReadLastLocation,
    EndRide,
    ReadRideSummary,
    ReadRideSummaryAost,
}

impl OperationCategory {
    pub const ALL: [OperationCategory; 9] = [
        OperationCategory::ReadUser,
        OperationCategory::ReadVehicle,
        OperationCategory::UpdateVehicleStatus,
        OperationCategory::InsertRide,
        OperationCategory::InsertLocation,
        OperationCategory::ReadLastLocation,
        OperationCategory::EndRide,
        OperationCategory::ReadRideSummary,
        OperationCategory::ReadRideSummaryAost,
    ];

    /// Stable name used in reports and logs.
    pub fn name(self) -> &'static str {
        match self {
            OperationCategory::ReadUser => "read_user",
            OperationCategory::ReadVehicle => "read_vehicle",
            OperationCategory::UpdateVehicleStatus => "update_vehicle_status",
            OperationCategory::InsertRide => "insert_ride",
            OperationCategory::InsertLocation => "insert_location",
            OperationCategory::ReadLastLocation => "read_last_location",
            OperationCategory::EndRide => "end_ride",
            OperationCategory::ReadRideSummary => "read_ride_summary",
            OperationCategory::ReadRideSummaryAost => "read_ride_summary_aost",
        }
    }

    /// Name of the Prometheus histogram for this category.
    pub fn metric_name(self) -> &'static str {
        match self {
            OperationCategory::ReadUser => "read_user_latency",
            OperationCategory::ReadVehicle => "read_vehicle_latency",
            OperationCategory::UpdateVehicleStatus => "update_vehicle_status_latency",
            OperationCategory::InsertRide => "add_a_ride_latency",
            OperationCategory::InsertLocation => "update_vehicle_location_latency",
            OperationCategory::ReadLastLocation => "read_vehicle_location_latency",
            OperationCategory::EndRide => "end_a_ride_latency",
            OperationCategory::ReadRideSummary => "read_a_ride_summary_latency",
            OperationCategory::ReadRideSummaryAost => "read_a_ride_summary_aost_latency",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Latency summary of one category over a reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryStats {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl CategoryStats {
    fn record(&mut self, elapsed: Duration) {
        if self.count == 0 || elapsed < self.min {
            self.min = elapsed;
        }
        self.max = self.max.max(elapsed);
        self.total = self.total.saturating_add(elapsed);
        self.count += 1;
    }

    pub fn mean(&self) -> Option<Duration> {
        let count = u32::try_from(self.count).ok()?;
        self.total.checked_div(count)
    }
}

struct Window {
    started: Instant,
    categories: [CategoryStats; OperationCategory::ALL.len()],
}

impl Window {
    fn new(started: Instant) -> Self {
        Self {
            started,
            categories: [CategoryStats::default(); OperationCategory::ALL.len()],
        }
    }
}

/// Shared accumulator of operation latencies.
pub struct Stats {
    interval: Duration,
    window: Mutex<Window>,
    node: Mutex<Option<NodeInfo>>,
}

impl Stats {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    /// Accumulator whose first window opens at `start`.
    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            window: Mutex::new(Window::new(start)),
            node: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Adds one completed operation of `category` to the current window.
    pub fn record(&self, category: OperationCategory, elapsed: Duration) {
        let mut window = self.window.lock().unwrap();
        window.categories[category.index()].record(elapsed);
    }

    /// Replaces the last observed serving node.
    pub fn update_node_info(&self, node: NodeInfo) {
        *self.node.lock().unwrap() = Some(node);
    }

    pub fn node_info(&self) -> Option<NodeInfo> {
        self.node.lock().unwrap().clone()
    }

    /// Closes the current window if at least one interval has passed since
    /// it opened at `now`, and returns its report.
    pub fn flush_if_due(&self, now: Instant) -> Option<StatsReport> {
        let mut window = self.window.lock().unwrap();
        if now.saturating_duration_since(window.started) < self.interval {
            return None;
        }
        let closed = std::mem::replace(&mut *window, Window::new(now));
        drop(window);
        Some(self.report(closed, now))
    }

    /// Closes the current window regardless of its age.
    pub fn flush(&self, now: Instant) -> StatsReport {
        let closed = std::mem::replace(&mut *self.window.lock().unwrap(), Window::new(now));
        self.report(closed, now)
    }

    fn report(&self, window: Window, now: Instant) -> StatsReport {
        StatsReport {
            elapsed: now.saturating_duration_since(window.started),
            node: self.node_info(),
            categories: OperationCategory::ALL
                .into_iter()
                .zip(window.categories)
                .collect(),
        }
    }
}

/// Contents of one closed reporting window.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    /// Time covered by the window.
    pub elapsed: Duration,
    pub node: Option<NodeInfo>,
    pub categories: Vec<(OperationCategory, CategoryStats)>,
}

impl StatsReport {
    pub fn get(&self, category: OperationCategory) -> CategoryStats {
        self.categories
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, stats)| *stats)
            .unwrap_or_default()
    }

    pub fn total_ops(&self) -> u64 {
        self.categories.iter().map(|(_, stats)| stats.count).sum()
    }

    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.total_ops() as f64 / secs
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--- {:.1}s window", self.elapsed.as_secs_f64())?;
        match &self.node {
            Some(node) => writeln!(f, ", served by node {} at {} ---", node.node_id, node.address)?,
            None => writeln!(f, ", serving node unknown ---")?,
        }
        writeln!(
            f,
            "{:<24} {:>8} {:>10} {:>10} {:>10}",
            "operation", "count", "mean ms", "min ms", "max ms"
        )?;
        for (category, stats) in &self.categories {
            match stats.mean() {
                Some(mean) if stats.count > 0 => writeln!(
                    f,
                    "{:<24} {:>8} {:>10.2} {:>10.2} {:>10.2}",
                    category.name(),
                    stats.count,
                    millis(mean),
                    millis(stats.min),
                    millis(stats.max)
                )?,
                _ => writeln!(
                    f,
                    "{:<24} {:>8} {:>10} {:>10} {:>10}",
                    category.name(),
                    stats.count,
                    "-",
                    "-",
                    "-"
                )?,
            }
        }
        write!(
            f,
            "total {} ops, {:.1} ops/sec",
            self.total_ops(),
            self.ops_per_sec()
        )
    }
}
