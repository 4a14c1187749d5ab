//! The ride lifecycle loop.
//!
//! Each worker repeatedly picks a random user and vehicle and drives one ride
//! from start to summary, one transaction per step. Every step goes through
//! the [`TransactionExecutor`] and its latency, retries included, is recorded
//! in [`Stats`] under the step's [`OperationCategory`].

pub mod actors;
pub mod error;

use crate::config::{OnExhausted, WorkloadConfig};
use crate::db::error::DBError;
use crate::db::executor::{RetryPolicy, TransactionExecutor};
use crate::db::operations::RideTransaction;
use crate::db::storage::Storage;
use crate::db::types::vehicle::VehicleStatus;
use crate::stats::{OperationCategory, Stats};
use actors::{random_position, ActorPool, RideSession};
use chrono::Utc;
use error::WorkloadError;
use futures_util::future::BoxFuture;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Random source of worker `index`: reproducible when a seed is configured.
pub fn worker_rng(seed: Option<u64>, index: u32) -> StdRng {
    match seed {
        Some(seed) => {
            StdRng::seed_from_u64(seed ^ u64::from(index).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        }
        None => StdRng::from_entropy(),
    }
}

/// Startup reads before the first ride: the node serving the connection,
/// which is recorded in `stats`, and the users and vehicles to pick from.
///
/// An interruption while a read waits to be retried yields
/// [`WorkloadError::Cancelled`].
pub async fn prepare<S: Storage>(
    storage: &S,
    executor: &TransactionExecutor,
    stats: &Stats,
) -> Result<ActorPool, WorkloadError> {
    let node = executor
        .run(storage, |txn| {
            Box::pin(async move { txn.get_node_info().await })
        })
        .await?;
    info!("Connected to node id {} at {}", node.node_id, node.address);
    stats.update_node_info(node);
    ActorPool::load(storage, executor).await
}

/// Shared state of all the workers of a run.
pub struct Workload<S> {
    storage: Arc<S>,
    executor: TransactionExecutor,
    stats: Arc<Stats>,
    actors: Arc<ActorPool>,
    config: WorkloadConfig,
    cancel: CancellationToken,
}

impl<S: Storage + 'static> Workload<S> {
    pub fn new(
        storage: Arc<S>,
        executor: TransactionExecutor,
        stats: Arc<Stats>,
        actors: Arc<ActorPool>,
        config: WorkloadConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            storage,
            executor,
            stats,
            actors,
            config,
            cancel,
        }
    }

    /// Runs the workers until they are cancelled, reach the configured number
    /// of rides, or one of them fails. Returns the number of completed rides.
    ///
    /// A failing worker cancels the others; its error is returned once all
    /// of them have stopped.
    pub async fn run(self) -> Result<u64, WorkloadError> {
        let workers = self.config.workers.max(1);
        info!(
            "Starting {workers} worker(s), {} location updates per ride, rides in {}",
            self.config.updates_per_ride, self.config.city
        );
        if workers == 1 {
            return self.worker(0, true).run().await;
        }

        let mut tasks = JoinSet::new();
        for index in 0..workers {
            tasks.spawn(self.worker(index, false).run());
        }
        let reporter = tokio::spawn(report_periodically(
            self.stats.clone(),
            self.cancel.clone(),
        ));

        let mut rides = 0;
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(completed)) => rides += completed,
                Ok(Err(e)) => {
                    self.cancel.cancel();
                    failure = failure.or(Some(e));
                }
                Err(e) => {
                    self.cancel.cancel();
                    failure = failure.or(Some(WorkloadError::WorkerTask(e)));
                }
            }
        }
        self.cancel.cancel();
        let _ = reporter.await;
        match failure {
            Some(e) => Err(e),
            None => Ok(rides),
        }
    }

    fn worker(&self, index: u32, reports: bool) -> Worker<S> {
        Worker {
            index,
            storage: self.storage.clone(),
            executor: self.executor.clone(),
            stats: self.stats.clone(),
            actors: self.actors.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
            rng: worker_rng(self.config.seed, index),
            reports,
        }
    }
}

async fn report_periodically(stats: Arc<Stats>, cancel: CancellationToken) {
    let mut ticks = tokio::time::interval(stats.interval());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {
                if let Some(report) = stats.flush_if_due(Instant::now()) {
                    println!("{report}");
                }
            }
        }
    }
}

/// How far an iteration got, for cleaning up after a skipped ride.
#[derive(Debug, Default)]
struct Progress {
    vehicle_in_use: bool,
    ride_started: bool,
}

struct Worker<S> {
    index: u32,
    storage: Arc<S>,
    executor: TransactionExecutor,
    stats: Arc<Stats>,
    actors: Arc<ActorPool>,
    config: WorkloadConfig,
    cancel: CancellationToken,
    rng: StdRng,
    reports: bool,
}

impl<S: Storage> Worker<S> {
    async fn run(mut self) -> Result<u64, WorkloadError> {
        let mut rides = 0;
        while !self.cancel.is_cancelled() {
            if self.config.rides.is_some_and(|limit| rides >= limit) {
                break;
            }
            let session = RideSession::begin(&self.actors, &self.config.city, &mut self.rng);
            let mut progress = Progress::default();
            match self.ride(&session, &mut progress).await {
                Ok(()) => rides += 1,
                Err(WorkloadError::Cancelled) => break,
                Err(e @ WorkloadError::RetriesExhausted { .. })
                    if self.config.on_exhausted == OnExhausted::Skip =>
                {
                    error!(
                        "Worker {}: skipping ride {} of vehicle {}: {e}",
                        self.index, session.ride_id, session.vehicle_id
                    );
                    if progress.ride_started {
                        self.end_skipped_ride(&session).await;
                    }
                    if progress.vehicle_in_use {
                        self.release_vehicle(&session).await;
                    }
                }
                Err(e) => {
                    error!(
                        "Worker {}: ride {} of vehicle {} failed: {e}",
                        self.index, session.ride_id, session.vehicle_id
                    );
                    return Err(e);
                }
            }
            if self.reports {
                if let Some(report) = self.stats.flush_if_due(Instant::now()) {
                    println!("{report}");
                }
            }
        }
        debug!("Worker {} stopped after {rides} rides", self.index);
        Ok(rides)
    }

    /// Runs `op` through the executor and records its latency under `category`.
    async fn timed<T, F>(&self, category: OperationCategory, op: F) -> Result<T, WorkloadError>
    where
        T: Send,
        F: for<'t> Fn(&'t dyn RideTransaction) -> BoxFuture<'t, Result<T, DBError>>
            + Send
            + Sync,
    {
        let start = Instant::now();
        let result = self.executor.run(self.storage.as_ref(), op).await;
        let elapsed = start.elapsed();
        match result {
            Ok(value) => {
                self.stats.record(category, elapsed);
                crate::metrics::observe(category, elapsed);
                Ok(value)
            }
            Err(e) => Err(WorkloadError::from_step(category, e)),
        }
    }

    async fn ride(
        &mut self,
        session: &RideSession,
        progress: &mut Progress,
    ) -> Result<(), WorkloadError> {
        let ride_id = session.ride_id;
        let user_id = session.user_id;
        let vehicle_id = session.vehicle_id;
        let start_time = session.start_time;
        debug!(
            "Worker {}: ride {ride_id} of user {user_id} on vehicle {vehicle_id}",
            self.index
        );

        self.timed(OperationCategory::ReadUser, move |txn| {
            Box::pin(async move { txn.get_user(user_id).await })
        })
        .await?;
        self.timed(OperationCategory::ReadVehicle, move |txn| {
            Box::pin(async move { txn.get_vehicle(vehicle_id).await })
        })
        .await?;
        self.timed(OperationCategory::UpdateVehicleStatus, move |txn| {
            Box::pin(async move {
                txn.update_vehicle_status(vehicle_id, VehicleStatus::InUse)
                    .await
            })
        })
        .await?;
        progress.vehicle_in_use = true;

        let city = session.city.clone();
        self.timed(OperationCategory::InsertRide, move |txn| {
            let city = city.clone();
            Box::pin(async move {
                txn.start_ride(ride_id, user_id, start_time, vehicle_id, &city)
                    .await
            })
        })
        .await?;
        progress.ride_started = true;

        for _ in 0..self.config.updates_per_ride {
            let seen_time = Utc::now();
            let (lat, long) = random_position(&mut self.rng);
            let location_id = self
                .timed(OperationCategory::InsertLocation, move |txn| {
                    Box::pin(async move {
                        txn.add_vehicle_location_history(ride_id, seen_time, lat, long)
                            .await
                    })
                })
                .await?;
            self.timed(OperationCategory::ReadLastLocation, move |txn| {
                Box::pin(async move { txn.read_vehicle_last_location(location_id).await })
            })
            .await?;
        }

        let end_time = Utc::now();
        self.timed(OperationCategory::EndRide, move |txn| {
            Box::pin(async move { txn.end_ride(ride_id, end_time).await })
        })
        .await?;
        progress.ride_started = false;
        self.timed(OperationCategory::UpdateVehicleStatus, move |txn| {
            Box::pin(async move {
                txn.update_vehicle_status(vehicle_id, VehicleStatus::Available)
                    .await
            })
        })
        .await?;
        progress.vehicle_in_use = false;

        self.timed(OperationCategory::ReadRideSummary, move |txn| {
            Box::pin(async move { txn.read_ride_info(ride_id).await })
        })
        .await?;
        let stale = self
            .timed(OperationCategory::ReadRideSummaryAost, move |txn| {
                Box::pin(async move { txn.read_ride_info_aost(ride_id).await })
            })
            .await?;
        if stale.is_none() {
            debug!(
                "Worker {}: ride {ride_id} not yet visible to follower reads",
                self.index
            );
        }

        let node = self
            .executor
            .run(self.storage.as_ref(), |txn| {
                Box::pin(async move { txn.get_node_info().await })
            })
            .await?;
        self.stats.update_node_info(node);
        Ok(())
    }

    /// Executor for cleanup steps, which get a single attempt.
    fn single_attempt(&self) -> TransactionExecutor {
        TransactionExecutor::new(
            RetryPolicy {
                max_attempts: 1,
                ..*self.executor.policy()
            },
            self.cancel.clone(),
        )
    }

    /// Single attempt at ending a skipped ride which was already started.
    async fn end_skipped_ride(&self, session: &RideSession) {
        let ride_id = session.ride_id;
        let end_time = Utc::now();
        let ended = self
            .single_attempt()
            .run(self.storage.as_ref(), move |txn| {
                Box::pin(async move { txn.end_ride(ride_id, end_time).await })
            })
            .await;
        match ended {
            Ok(()) => info!("Worker {}: skipped ride {ride_id} ended", self.index),
            Err(e) => warn!(
                "Worker {}: skipped ride {ride_id} may be left unended: {e}",
                self.index
            ),
        }
    }

    /// Single attempt at making the vehicle of a skipped ride available again.
    async fn release_vehicle(&self, session: &RideSession) {
        let vehicle_id = session.vehicle_id;
        let released = self
            .single_attempt()
            .run(self.storage.as_ref(), move |txn| {
                Box::pin(async move {
                    txn.update_vehicle_status(vehicle_id, VehicleStatus::Available)
                        .await
                })
            })
            .await;
        match released {
            Ok(()) => info!(
                "Worker {}: vehicle {vehicle_id} of the skipped ride is available again",
                self.index
            ),
            Err(e) => warn!(
                "Worker {}: vehicle {vehicle_id} may be left in use: {e}",
                self.index
            ),
        }
    }
}
