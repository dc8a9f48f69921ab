//! # Night cycle
//!
//! [`AssociationOrchestrator`] drives one survey night through the whole pipeline:
//!
//! ```text
//! validate batch
//!   → intra-night clustering (tracklets + singletons)
//!   → inter-night linking, enabled stages in priority order
//!   → advance_night → prune → leftover singletons to the pool
//!   → orbit fit of the trajectories reaching orbfit_min_points
//!   → commit the store → emit the trajectory set
//! ```
//!
//! The night runs on a copy of the [`TrajectoryStore`]. Any error before the commit
//! (invalid batch, memory budget, worker spawn failure) leaves the store exactly as it
//! was; nights are processed one after the other, never concurrently.
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    associations::{
        inter_night::{link_night, StageCounts},
        intra_night::cluster_night,
    },
    asterlink_errors::AsterlinkError,
    config::Config,
    constants::{NightId, TrajectoryId},
    observations::NightBatch,
    orbit_fit::{fit_adapter::OrbitFitAdapter, OrbitFitParams, OrbitSolver},
    trajectories::{
        association_sink::{AssociationSink, TrajectoryRecord},
        trajectory_store::TrajectoryStore,
    },
};

/// What happened during one night.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NightReport {
    pub nid: NightId,
    pub n_observations: usize,
    pub n_tracklets: usize,
    pub n_singletons: usize,
    pub stage_counts: StageCounts,
    pub n_new_trajectories: usize,
    pub n_pruned: usize,
    pub n_pool_expired: usize,
    pub n_pooled: usize,
    pub fits_attempted: usize,
    pub fits_confirmed: usize,
    pub fits_failed: usize,
    /// Trajectories in the store after the commit.
    pub n_trajectories: usize,
}

/// Build the worker pool of the intra-stage parallelism.
pub fn build_worker_pool(config: &Config) -> Result<ThreadPool, AsterlinkError> {
    ThreadPoolBuilder::new()
        .num_threads(config.resources.worker_count())
        .thread_name(|i| format!("asterlink-worker-{i}"))
        .build()
        .map_err(|err| {
            AsterlinkError::ResourceExhaustion(format!("cannot build the worker pool: {err}"))
        })
}

pub struct AssociationOrchestrator {
    config: Config,
    adapter: OrbitFitAdapter,
    workers: ThreadPool,
    store: TrajectoryStore,
    sink: Box<dyn AssociationSink>,
}

impl AssociationOrchestrator {
    /// Orchestrator with the orbit-fit knobs derived from `config`.
    pub fn new(
        config: Config,
        solver: Arc<dyn OrbitSolver>,
        sink: Box<dyn AssociationSink>,
    ) -> Result<Self, AsterlinkError> {
        let fit_params = OrbitFitParams::builder_from(&config.solve_orbit_params).build()?;
        Self::with_fit_params(config, fit_params, solver, sink)
    }

    /// Orchestrator with explicit orbit-fit parameters.
    pub fn with_fit_params(
        config: Config,
        fit_params: OrbitFitParams,
        solver: Arc<dyn OrbitSolver>,
        sink: Box<dyn AssociationSink>,
    ) -> Result<Self, AsterlinkError> {
        config.validate()?;
        let workers = build_worker_pool(&config)?;
        debug!(workers = workers.current_num_threads(), "{fit_params}");
        Ok(AssociationOrchestrator {
            config,
            adapter: OrbitFitAdapter::new(solver, fit_params),
            workers,
            store: TrajectoryStore::new(),
            sink,
        })
    }

    /// Resume from a previously saved store.
    pub fn with_store(mut self, store: TrajectoryStore) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &TrajectoryStore {
        &self.store
    }

    /// Run one night cycle.
    ///
    /// Arguments
    /// -----------------
    /// * `batch`: every detection of the night, any order.
    ///
    /// Return
    /// ----------
    /// * `Ok(NightReport)` once the store is committed and the trajectory set emitted.
    /// * `Err(InvalidObservation | DuplicateCandId)` for a malformed batch or a night older
    ///   than the last processed one, `Err(ResourceExhaustion)` when a stage exceeds its
    ///   budget: the store is left untouched.
    /// * `Err` from the sink: the night is committed but its output is missing.
    pub fn run_night(&mut self, batch: NightBatch) -> Result<NightReport, AsterlinkError> {
        batch.validate()?;
        let nid = batch.nid;
        if nid < self.store.current_nid() {
            return Err(AsterlinkError::InvalidObservation(format!(
                "night {nid} is older than the last processed night {}",
                self.store.current_nid()
            )));
        }

        let mut report = NightReport {
            nid,
            n_observations: batch.len(),
            ..NightReport::default()
        };
        let mut store = self.store.clone();
        store.begin_night(nid);

        let observations = batch.sorted_observations();
        let night = cluster_night(&observations, &self.config.assoc_params);
        report.n_tracklets = night.tracklets.len();
        report.n_singletons = night.singletons.len();

        let link = link_night(&mut store, night, &self.config, &self.workers)?;
        report.stage_counts = link.counts;
        report.n_new_trajectories = link.new_trajectories.len();

        store.advance_night();
        let pruned = store.prune(&self.config.tw_params);
        report.n_pruned = pruned.trajectories.len();
        report.n_pool_expired = pruned.pooled_observations;
        if !pruned.trajectories.is_empty() {
            debug!(nid, pruned = ?pruned.trajectories, "trajectories pruned");
        }
        store.add_to_pool(link.leftover);
        report.n_pooled = store.pool().len();

        let queue = store.fit_queue(self.config.solve_orbit_params.orbfit_min_points);
        let sizes: Vec<(TrajectoryId, usize)> = queue
            .iter()
            .filter_map(|id| store.get(*id).map(|t| (t.id, t.len())))
            .collect();
        let outcomes = {
            let candidates: Vec<_> = queue.iter().filter_map(|id| store.get(*id)).collect();
            self.adapter.fit_many(&candidates, &self.workers)?
        };
        report.fits_attempted = outcomes.len();

        for (outcome, (id, n_points)) in outcomes.into_iter().zip(sizes) {
            let record = outcome.to_record(nid, n_points);
            match outcome.elements {
                Some(elements) => {
                    store.mark_confirmed(id, elements, record)?;
                    report.fits_confirmed += 1;
                }
                None => {
                    store.record_fit_failure(id, record)?;
                    report.fits_failed += 1;
                }
            }
        }
        report.n_trajectories = store.len();

        // commit
        self.store = store;

        info!(
            nid,
            n_observations = report.n_observations,
            n_tracklets = report.n_tracklets,
            n_singletons = report.n_singletons,
            links = report.stage_counts.total(),
            n_new_trajectories = report.n_new_trajectories,
            n_pruned = report.n_pruned,
            fits_attempted = report.fits_attempted,
            fits_confirmed = report.fits_confirmed,
            n_trajectories = report.n_trajectories,
            "night committed"
        );

        let records: Vec<TrajectoryRecord> = self
            .store
            .iter()
            .map(TrajectoryRecord::from_trajectory)
            .collect();
        self.sink.emit(nid, &records)?;
        Ok(report)
    }
}
