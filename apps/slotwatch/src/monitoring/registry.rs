use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use super::types::{Target, TargetId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("target id must not be empty (target {name:?})")]
    EmptyId { name: String },
    #[error("duplicate target id {0}")]
    DuplicateId(TargetId),
}

/// Fixed set of targets known to this process
#[derive(Debug, Clone, Default)]
pub struct Registry {
    targets: Vec<Arc<Target>>,
}

impl Registry {
    /// Build a registry, rejecting empty or repeated ids
    pub fn new(targets: impl IntoIterator<Item = Target>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        let mut registered = Vec::new();

        for target in targets {
            if target.id.as_str().trim().is_empty() {
                return Err(RegistryError::EmptyId { name: target.name });
            }
            if !seen.insert(target.id.clone()) {
                return Err(RegistryError::DuplicateId(target.id));
            }
            registered.push(Arc::new(target));
        }

        Ok(Self { targets: registered })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Target>> {
        self.targets.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TargetId> {
        self.targets.iter().map(|target| &target.id)
    }

    pub fn get(&self, id: &TargetId) -> Option<&Arc<Target>> {
        self.targets.iter().find(|target| &target.id == id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
