//! Catalog reconciler.
//!
//! The scrape step writes provider truth (`state`) into the catalog; the
//! manage step turns desired state (`next_state`) into provider start/stop
//! calls. Neither step waits for the other: a start issued by `reconcile` is
//! only observed by a later `scrape`.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use ez2boot_core::db::unix_timestamp;
use tracing::{debug, info, warn};

use crate::provider::{Provider, ProviderError};
use crate::scheduler::PeriodicTask;
use crate::storage::{CatalogDatabase, CatalogSyncReport, DatabaseError, ServerState};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Ids handed to the provider by one manage step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManageReport {
    pub started: BTreeSet<String>,
    pub stopped: BTreeSet<String>,
}

pub struct Reconciler {
    db: CatalogDatabase,
    provider: Arc<dyn Provider>,
}

impl Reconciler {
    pub fn new(db: CatalogDatabase, provider: Arc<dyn Provider>) -> Self {
        Self { db, provider }
    }

    /// Scrape the provider and sync the result into the catalog.
    ///
    /// A provider failure leaves the catalog untouched.
    pub async fn scrape(&self) -> Result<CatalogSyncReport, ReconcileError> {
        let instances = self.provider.scrape().await?;
        let report = self.db.sync_catalog(&instances, unix_timestamp()).await?;

        if report.is_noop() {
            debug!(
                provider = self.provider.name(),
                count = instances.len(),
                "Catalog unchanged"
            );
        } else {
            info!(
                provider = self.provider.name(),
                count = instances.len(),
                changed = report.changed,
                removed = report.removed,
                "Catalog updated from scrape"
            );
        }
        Ok(report)
    }

    /// Start servers that are off but wanted on, and stop servers that are
    /// on but wanted off. Servers in `transitioning` are left alone.
    ///
    /// A failed start batch does not skip the stop batch; the first provider
    /// error is returned after both have been attempted.
    pub async fn reconcile(&self) -> Result<ManageReport, ReconcileError> {
        let mut report = ManageReport::default();
        let mut failure: Option<ProviderError> = None;

        let to_start: BTreeSet<String> = self
            .db
            .pending_server_ids(ServerState::Off, ServerState::On)
            .await?
            .into_iter()
            .collect();
        if to_start.is_empty() {
            debug!("No servers to start");
        } else {
            info!(count = to_start.len(), "Starting servers");
            match self.provider.start(&to_start).await {
                Ok(()) => report.started = to_start,
                Err(e) => {
                    warn!(
                        provider = self.provider.name(),
                        count = to_start.len(),
                        error = %e,
                        "Start batch failed"
                    );
                    failure = Some(e);
                }
            }
        }

        let to_stop: BTreeSet<String> = self
            .db
            .pending_server_ids(ServerState::On, ServerState::Off)
            .await?
            .into_iter()
            .collect();
        if to_stop.is_empty() {
            debug!("No servers to stop");
        } else {
            info!(count = to_stop.len(), "Stopping servers");
            match self.provider.stop(&to_stop).await {
                Ok(()) => report.stopped = to_stop,
                Err(e) => {
                    warn!(
                        provider = self.provider.name(),
                        count = to_stop.len(),
                        error = %e,
                        "Stop batch failed"
                    );
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(report),
        }
    }
}

/// Periodic scrape step.
pub struct ScrapeTask(pub Arc<Reconciler>);

#[async_trait]
impl PeriodicTask for ScrapeTask {
    fn name(&self) -> &'static str {
        "scrape"
    }

    async fn run_once(&self) {
        if let Err(e) = self.0.scrape().await {
            warn!(error = %e, "Scrape failed; retrying next tick");
        }
    }
}

/// Periodic manage step.
pub struct ManageTask(pub Arc<Reconciler>);

#[async_trait]
impl PeriodicTask for ManageTask {
    fn name(&self) -> &'static str {
        "manage"
    }

    async fn run_once(&self) {
        if let Err(e) = self.0.reconcile().await {
            warn!(error = %e, "Reconcile failed; retrying next tick");
        }
    }
}
