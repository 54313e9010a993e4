//! Periodic task runner.
//!
//! One tokio task per component, each on its own interval. There is no shared
//! in-process lock: all coordination happens through the store. Shutdown is
//! cooperative - a tick that is already running finishes (its RPCs complete
//! or time out), then the task exits.

use crate::aggregator::Aggregator;
use crate::healer::SelfHealer;
use crate::notifier::Notifier;
use ladder_common::LadderError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct Scheduler {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Number of running tasks
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Run `tick` every `every` until shutdown. The first tick fires at once.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, every: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => tick().await,
                }
            }
            debug!("{} task stopped", name);
        });

        info!("{} task started (interval: {:?})", name, every);
        self.handles.push((name, handle));
    }

    pub fn spawn_aggregator(&mut self, aggregator: Arc<Aggregator>, every: Duration) {
        self.spawn_periodic("Reconcile", every, move || {
            let aggregator = Arc::clone(&aggregator);
            async move { reconcile_tick(&aggregator).await }
        });
    }

    pub fn spawn_healer(&mut self, healer: Arc<SelfHealer>, every: Duration) {
        self.spawn_periodic("Self-heal", every, move || {
            let healer = Arc::clone(&healer);
            async move { heal_tick(&healer).await }
        });
    }

    pub fn spawn_notifier(&mut self, notifier: Arc<Notifier>, every: Duration) {
        self.spawn_periodic("Notify", every, move || {
            let notifier = Arc::clone(&notifier);
            async move { notify_tick(&notifier).await }
        });
    }

    /// Signal every task and wait for them to finish their current tick.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                error!("{} task ended abnormally: {}", name, e);
            }
        }
        info!("Scheduler stopped");
    }
}

fn log_tick_error(tag: &str, err: &LadderError) {
    if err.is_transient() {
        warn!("[{}] Tick aborted, retrying next schedule: {}", tag, err);
    } else {
        error!("[{}] Tick failed: {}", tag, err);
    }
}

/// One reconcile pass with errors caught at the task boundary.
pub async fn reconcile_tick(aggregator: &Aggregator) {
    if let Err(e) = aggregator.reconcile().await {
        log_tick_error("RECONCILE", &e);
    }
}

/// One healer pass; per-key failures are already logged inside the pass.
pub async fn heal_tick(healer: &SelfHealer) {
    let report = healer.run_pass().await;
    if report.rewritten + report.reset + report.errors > 0 {
        info!(
            "[HEAL] Pass done: {} coerced, {} reset, {} unparseable, {} errors",
            report.rewritten, report.reset, report.unparseable, report.errors
        );
    } else {
        debug!("[HEAL] Pass clean");
    }
}

/// One notifier tick with errors caught at the task boundary.
pub async fn notify_tick(notifier: &Notifier) {
    if let Err(e) = notifier.tick().await {
        log_tick_error("NOTIFY", &e);
    }
}
