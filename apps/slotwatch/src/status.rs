use std::fmt;

use crate::monitoring::{Registry, TargetId};
use crate::store::StateStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStatus {
    pub id: TargetId,
    pub name: String,
    pub active: bool,
}

/// Point-in-time view of the monitoring state, in registry order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub polling_enabled: bool,
    pub recipients: usize,
    pub targets: Vec<TargetStatus>,
}

impl StatusReport {
    pub async fn collect(registry: &Registry, store: &StateStore) -> Self {
        let state = store.snapshot().await;
        let targets = registry
            .iter()
            .map(|target| TargetStatus {
                id: target.id.clone(),
                name: target.name.clone(),
                active: state.is_target_active(&target.id),
            })
            .collect();

        Self { polling_enabled: state.polling_enabled, recipients: state.recipients.len(), targets }
    }

    pub fn all_done(&self) -> bool {
        self.targets.iter().all(|target| !target.active)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Monitoring status:")?;
        writeln!(f, "  Polling: {}", if self.polling_enabled { "enabled" } else { "stopped" })?;
        writeln!(f, "  Subscribers: {}", self.recipients)?;
        writeln!(f, "  Targets:")?;
        for target in &self.targets {
            let state = if target.active { "in progress" } else { "booked" };
            writeln!(f, "    - {} [{}]: {}", target.name, target.id, state)?;
        }
        Ok(())
    }
}
