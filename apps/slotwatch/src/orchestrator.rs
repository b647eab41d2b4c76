/// Orchestrator - the control surface over the monitoring engine
///
/// The orchestrator:
/// - Turns polling on and off and broadcasts the change to subscribers
/// - Spawns one poller per still-active target for each monitoring cycle
/// - Closes the cycle (polling off, "all booked" broadcast) once every
///   target has succeeded
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::monitoring::{PollerExit, Prober, Registry, Target, TargetId, TargetPoller};
use crate::notify::Notifier;
use crate::status::StatusReport;
use crate::store::{RecipientId, StateStore, StoreError};

pub const STOPPED_MESSAGE: &str = "Monitoring stopped.";
pub const ALL_BOOKED_MESSAGE: &str = "All slots have been booked successfully!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// Every target already succeeded; a reset is needed first
    AllTargetsDone,
    NoTargets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// How a monitoring cycle ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub succeeded: usize,
    pub suspended: usize,
    /// This cycle observed the last target finishing and turned polling off
    pub completed: bool,
}

type Pollers = JoinSet<(TargetId, PollerExit)>;

/// What every poller of every cycle shares
struct Engine {
    registry: Arc<Registry>,
    store: Arc<StateStore>,
    prober: Arc<dyn Prober>,
    notifier: Arc<Notifier>,
    interval: Duration,
    /// Targets that currently have a running poller
    live: Arc<Mutex<HashSet<TargetId>>>,
}

impl Engine {
    /// Spawn a poller for `target` into `pollers` unless one is already live
    fn spawn_poller(&self, pollers: &mut Pollers, target: &Arc<Target>) -> bool {
        let Some(guard) = LiveGuard::claim(&self.live, &target.id) else {
            return false;
        };

        let poller = TargetPoller::new(
            target.clone(),
            self.store.clone(),
            self.prober.clone(),
            self.notifier.clone(),
            self.interval,
        );
        let id = target.id.clone();
        pollers.spawn(async move {
            let _guard = guard;
            (id, poller.run().await)
        });
        true
    }
}

/// Main orchestrator for slot monitoring
pub struct Orchestrator {
    engine: Arc<Engine>,
    cycles: Mutex<Vec<JoinHandle<CycleReport>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<StateStore>,
        prober: Arc<dyn Prober>,
        notifier: Arc<Notifier>,
        interval: Duration,
    ) -> Self {
        let engine = Engine {
            registry,
            store,
            prober,
            notifier,
            interval,
            live: Arc::new(Mutex::new(HashSet::new())),
        };
        Self { engine: Arc::new(engine), cycles: Mutex::new(Vec::new()) }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.engine.store
    }

    /// Turn polling on and start a monitoring cycle
    pub async fn enable_polling(&self) -> Result<StartOutcome, StoreError> {
        let Engine { registry, store, notifier, interval, .. } = self.engine.as_ref();
        if registry.is_empty() {
            return Ok(StartOutcome::NoTargets);
        }

        let state = store.snapshot().await;
        if state.polling_enabled {
            // Pollers of a previous cycle may have exited already.
            self.start_cycle().await;
            return Ok(StartOutcome::AlreadyRunning);
        }
        if registry.ids().all(|id| !state.is_target_active(id)) {
            return Ok(StartOutcome::AllTargetsDone);
        }

        store.set_polling_enabled(true).await?;
        info!(?interval, "Monitoring started");

        let message = format!("Monitoring started!\nCheck interval: {} s", interval.as_secs_f64());
        notifier.broadcast(&store.recipients().await, &message).await;

        self.start_cycle().await;
        Ok(StartOutcome::Started)
    }

    /// Turn polling off. Running pollers exit at their next liveness check.
    pub async fn disable_polling(&self) -> Result<StopOutcome, StoreError> {
        let store = &self.engine.store;
        if !store.polling_enabled().await {
            return Ok(StopOutcome::AlreadyStopped);
        }

        store.set_polling_enabled(false).await?;
        info!("Monitoring stopped");
        self.engine.notifier.broadcast(&store.recipients().await, STOPPED_MESSAGE).await;
        Ok(StopOutcome::Stopped)
    }

    /// Mark every target active again. Stops polling if it was on, so the
    /// next start begins a clean cycle. Returns whether polling was stopped.
    pub async fn reset_all_targets(&self) -> Result<bool, StoreError> {
        self.engine.store.reset_all_targets().await?;
        info!("Target state reset");

        let stopped = self.disable_polling().await? == StopOutcome::Stopped;
        Ok(stopped)
    }

    /// Returns false if the recipient was already subscribed
    pub async fn subscribe(&self, recipient: RecipientId) -> Result<bool, StoreError> {
        let added = self.engine.store.add_recipient(recipient.clone()).await?;
        if added {
            info!(%recipient, "New recipient subscribed");
        }
        Ok(added)
    }

    pub async fn query_status(&self) -> StatusReport {
        StatusReport::collect(&self.engine.registry, &self.engine.store).await
    }

    /// Continue a cycle that was running when the process last stopped
    pub async fn resume(&self) -> bool {
        if !self.engine.store.polling_enabled().await {
            return false;
        }
        info!("Polling was enabled before restart, resuming");
        self.start_cycle().await;
        true
    }

    /// Spawn pollers for every active target that has none running.
    ///
    /// Returns the number of pollers spawned.
    pub async fn start_cycle(&self) -> usize {
        let state = self.engine.store.snapshot().await;

        let mut pollers = Pollers::new();
        for target in self.engine.registry.iter() {
            if state.is_target_active(&target.id) {
                self.engine.spawn_poller(&mut pollers, target);
            }
        }

        let spawned = pollers.len();
        debug!(spawned, "Monitoring cycle started");

        let cycle = tokio::spawn(supervise(self.engine.clone(), pollers));

        let mut cycles = lock(&self.cycles);
        cycles.retain(|handle| !handle.is_finished());
        cycles.push(cycle);
        spawned
    }

    /// Wait until every cycle started so far has ended
    pub async fn wait_idle(&self) -> Vec<CycleReport> {
        let handles: Vec<_> = lock(&self.cycles).drain(..).collect();

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(error) => error!(%error, "Monitoring cycle task failed"),
            }
        }
        reports
    }
}

/// Collect poller exits, then close the cycle if every target is done
async fn supervise(engine: Arc<Engine>, mut pollers: Pollers) -> CycleReport {
    let mut report = CycleReport::default();

    while let Some(joined) = pollers.join_next().await {
        match joined {
            Ok((_, PollerExit::Succeeded)) => report.succeeded += 1,
            Ok((id, PollerExit::Suspended)) => {
                // A start that landed while this poller was still live could
                // not replace it; the live entry is gone by now.
                let restarted = engine.store.is_target_pollable(&id).await
                    && engine
                        .registry
                        .get(&id)
                        .is_some_and(|target| engine.spawn_poller(&mut pollers, target));
                if restarted {
                    info!(slot = %id, "Polling re-enabled while stopping, poller restarted");
                } else {
                    report.suspended += 1;
                }
            }
            Err(error) => error!(%error, "Poller task failed"),
        }
    }

    let store = &engine.store;
    match store.finish_if_all_done(engine.registry.ids()).await {
        Ok(true) => {
            info!("All targets have returned success responses");
            engine.notifier.broadcast(&store.recipients().await, ALL_BOOKED_MESSAGE).await;
            engine.notifier.broadcast(&store.recipients().await, STOPPED_MESSAGE).await;
            report.completed = true;
        }
        Ok(false) => {}
        Err(error) => error!(%error, "Failed to close monitoring cycle"),
    }

    report
}

/// Holds a target's place in the live set until the poller task ends
struct LiveGuard {
    live: Arc<Mutex<HashSet<TargetId>>>,
    id: TargetId,
}

impl LiveGuard {
    fn claim(live: &Arc<Mutex<HashSet<TargetId>>>, id: &TargetId) -> Option<Self> {
        lock(live).insert(id.clone()).then(|| Self { live: live.clone(), id: id.clone() })
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        lock(&self.live).remove(&self.id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
