use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

use super::checker::Prober;
use super::classify::{classify, log_failure};
use super::types::{ProbeOutcome, Target};
use crate::notify::{Notifier, SuccessEvent};
use crate::store::StateStore;

/// Why a poller stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
    /// The target reported success; it is deactivated and recipients were notified
    Succeeded,
    /// Polling was turned off globally or for this target
    Suspended,
}

/// Retry loop for a single target.
///
/// Liveness is read from the shared store before every probe, after every
/// response and before every sleep, so anyone holding the store can stop a
/// poller without a handle to it. A stopped poller is not resumed; a new
/// monitoring cycle creates a fresh one.
pub struct TargetPoller {
    target: Arc<Target>,
    store: Arc<StateStore>,
    prober: Arc<dyn Prober>,
    notifier: Arc<Notifier>,
    interval: Duration,
}

impl TargetPoller {
    pub fn new(
        target: Arc<Target>,
        store: Arc<StateStore>,
        prober: Arc<dyn Prober>,
        notifier: Arc<Notifier>,
        interval: Duration,
    ) -> Self {
        Self { target, store, prober, notifier, interval }
    }

    pub async fn run(self) -> PollerExit {
        let name = self.target.name.as_str();
        debug!(slot = %name, interval = ?self.interval, "Poller started");

        loop {
            if !self.is_pollable().await {
                info!(slot = %name, "Polling suspended");
                return PollerExit::Suspended;
            }

            match self.prober.probe(&self.target).await {
                Ok(body) => {
                    // Deactivated while the request was in flight: drop the answer.
                    if !self.is_pollable().await {
                        info!(slot = %name, "Polling suspended, discarding response");
                        return PollerExit::Suspended;
                    }

                    match self.target.interpret(&body) {
                        ProbeOutcome::Success => {
                            self.on_success().await;
                            return PollerExit::Succeeded;
                        }
                        ProbeOutcome::Pending { message } => {
                            info!(
                                slot = %name,
                                message = message.as_deref().unwrap_or(""),
                                "Waiting for success response"
                            );
                        }
                    }
                }
                Err(error) => {
                    debug!(slot = %name, %error, "Probe failed");
                    log_failure(name, &classify(&error));
                }
            }

            if !self.is_pollable().await {
                info!(slot = %name, "Polling suspended");
                return PollerExit::Suspended;
            }
            sleep(self.interval).await;
        }
    }

    async fn is_pollable(&self) -> bool {
        self.store.is_target_pollable(&self.target.id).await
    }

    async fn on_success(&self) {
        let name = self.target.name.as_str();
        info!(slot = %name, "Success response received");

        if let Err(error) = self.store.deactivate_target(&self.target.id).await {
            error!(slot = %name, %error, "Failed to persist target deactivation");
        }

        let recipients = self.store.recipients().await;
        let report = self.notifier.notify(&recipients, &SuccessEvent::now(name)).await;
        if !report.failed.is_empty() {
            info!(
                slot = %name,
                delivered = report.delivered,
                failed = report.failed.len(),
                "Success notification partially delivered"
            );
        }
    }
}
