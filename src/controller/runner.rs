//! The reconciliation loop
//!
//! One [`Controller`] owns everything that survives between passes: the
//! configuration, the namespace filter and the non-ready tracker. Passes never
//! overlap; a tick that fires while a pass is running is delayed, not queued.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::config::ControllerConfig;
use super::namespaces::NamespaceFilter;
use super::reconciler::Reconciler;
use super::scanner;
use super::tracker::NonReadyTracker;
use crate::clock::{Clock, SystemClock};
use crate::cluster::ClusterClient;
use crate::error::Result;

/// What a single pass observed and did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub namespaces: usize,
    pub workloads: usize,
    pub non_ready: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
    pub interrupted: bool,
}

/// State shared with the health endpoint
#[derive(Debug, Default)]
pub struct ControllerState {
    last_pass: RwLock<Option<PassSummary>>,
    last_error: RwLock<Option<String>>,
}

impl ControllerState {
    pub async fn last_pass(&self) -> Option<PassSummary> {
        self.last_pass.read().await.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    async fn record_pass(&self, summary: PassSummary) {
        *self.last_pass.write().await = Some(summary);
        *self.last_error.write().await = None;
    }

    async fn record_error(&self, error: String) {
        *self.last_error.write().await = Some(error);
    }
}

pub struct Controller {
    cluster: Arc<dyn ClusterClient>,
    config: ControllerConfig,
    namespaces: NamespaceFilter,
    tracker: NonReadyTracker,
    clock: Arc<dyn Clock>,
    state: Arc<ControllerState>,
}

impl Controller {
    /// Validate `config` and build a controller; configuration errors are fatal
    pub fn new(cluster: Arc<dyn ClusterClient>, config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        let namespaces = NamespaceFilter::new(&config.namespace_selector)?;

        Ok(Self {
            cluster,
            config,
            namespaces,
            tracker: NonReadyTracker::new(),
            clock: Arc::new(SystemClock),
            state: Arc::new(ControllerState::default()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &NonReadyTracker {
        &self.tracker
    }

    pub fn state(&self) -> Arc<ControllerState> {
        Arc::clone(&self.state)
    }

    /// Check that the cluster is reachable and the credentials work
    pub async fn preflight(&self) -> Result<()> {
        let namespaces = self.namespaces.namespaces(self.cluster.as_ref()).await?;
        info!(
            "Connected to cluster, {} namespace(s) match selector {:?}",
            namespaces.len(),
            self.namespaces.selector().as_str()
        );
        Ok(())
    }

    /// Run passes on every tick until `token` is cancelled
    pub async fn run(&mut self, token: CancellationToken) {
        info!(
            interval = ?self.config.interval,
            non_ready_ttl = ?self.config.non_ready_ttl,
            suffix = %self.config.pdb_name_suffix,
            "Starting PDB controller loop"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.reconcile_once(&token).await {
                Ok(summary) => {
                    debug!(
                        created = summary.created,
                        updated = summary.updated,
                        deleted = summary.deleted,
                        failed = summary.failed,
                        duration_ms = summary.duration_ms,
                        "Reconciliation pass finished"
                    );
                    self.state.record_pass(summary).await;
                }
                Err(e) => {
                    debug!("Reconciliation pass failed: {}", e);
                    self.state.record_error(e.to_string()).await;
                }
            }
        }

        info!("Shutdown requested, PDB controller loop stopped");
    }

    /// Perform one complete pass
    ///
    /// A failure to read the cluster abandons the pass before the tracker or
    /// any PDB is touched. Failures writing individual PDBs are counted in the
    /// summary and retried on the next pass.
    #[instrument(skip(self, token))]
    pub async fn reconcile_once(&mut self, token: &CancellationToken) -> Result<PassSummary> {
        let timer = Instant::now();
        let started_at = self.clock.now();

        let snapshot = match self.scan().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                record_error(&e);
                return Err(e);
            }
        };

        let non_ready = self.tracker.observe(&snapshot.workloads, self.clock.now());
        for (key, elapsed) in &non_ready {
            debug!("{} non-ready for {:?}", key, elapsed);
        }

        let outcome = Reconciler::new(self.cluster.as_ref(), &self.config)
            .reconcile(&snapshot, &non_ready, token)
            .await;
        if outcome.interrupted {
            debug!("Reconciliation pass interrupted by shutdown");
        }

        let summary = PassSummary {
            started_at,
            duration_ms: timer.elapsed().as_millis() as u64,
            namespaces: snapshot.namespaces.len(),
            workloads: snapshot.workloads.iter().filter(|w| w.is_eligible()).count(),
            non_ready: non_ready.len(),
            created: outcome.created,
            updated: outcome.updated,
            deleted: outcome.deleted,
            failed: outcome.failed,
            interrupted: outcome.interrupted,
        };
        record_pass(&summary, timer);
        Ok(summary)
    }

    async fn scan(&self) -> Result<scanner::Snapshot> {
        let namespaces = self.namespaces.namespaces(self.cluster.as_ref()).await?;
        scanner::scan(self.cluster.as_ref(), &namespaces).await
    }
}

#[cfg(feature = "metrics")]
fn record_pass(summary: &PassSummary, timer: Instant) {
    use super::metrics;
    metrics::observe_reconcile_duration_seconds(timer.elapsed().as_secs_f64());
    metrics::set_workloads(summary.workloads);
    metrics::set_non_ready_workloads(summary.non_ready);
}

#[cfg(not(feature = "metrics"))]
fn record_pass(_summary: &PassSummary, _timer: Instant) {}

#[cfg(feature = "metrics")]
fn record_error(error: &crate::error::Error) {
    super::metrics::inc_reconcile_error(error.kind());
}

#[cfg(not(feature = "metrics"))]
fn record_error(_error: &crate::error::Error) {}
