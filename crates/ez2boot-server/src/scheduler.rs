//! Worker scheduler.
//!
//! Every worker runs in its own task on its own interval. Loops share nothing
//! but the catalog and one shutdown channel: flipping the channel lets each
//! loop finish its current tick and exit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ez2boot_core::config::WorkerConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::notifications::{Dispatcher, NotifyTask};
use crate::reconciler::{ManageTask, Reconciler, ScrapeTask};
use crate::session::{SessionLifecycle, SessionTask};

/// One step of a background worker. Implementations log their own failures.
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run_once(&self);
}

/// Spawn a loop that runs `task` every `period`.
///
/// Ticks never overlap; a tick that overruns delays the next one instead of
/// bursting. When `run_immediately` is false the first run waits one period.
pub fn spawn_periodic(
    task: Arc<dyn PeriodicTask>,
    period: Duration,
    run_immediately: bool,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !run_immediately {
            timer.tick().await; // Skip first immediate tick
        }
        info!(worker = task.name(), period = ?period, "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = timer.tick() => {
                    task.run_once().await;
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(worker = task.name(), "Worker shutting down");
    })
}

/// The four worker loops of a running server.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn start(
        config: &WorkerConfig,
        reconciler: Arc<Reconciler>,
        lifecycle: Arc<SessionLifecycle>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let clock = config.internal_clock;

        let workers: [(Arc<dyn PeriodicTask>, Duration, bool); 4] = [
            (
                Arc::new(ScrapeTask(Arc::clone(&reconciler))),
                config.scrape_interval,
                config.scrape_on_start,
            ),
            (Arc::new(ManageTask(reconciler)), clock, false),
            (Arc::new(SessionTask(lifecycle)), clock, false),
            (Arc::new(NotifyTask(dispatcher)), clock, false),
        ];

        let handles = workers
            .into_iter()
            .map(|(task, period, immediate)| {
                let name = task.name();
                (
                    name,
                    spawn_periodic(task, period, immediate, shutdown_rx.clone()),
                )
            })
            .collect();

        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Signal every loop and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!(worker = name, error = %e, "Worker task ended abnormally");
            }
        }
        info!("All workers stopped");
    }
}
