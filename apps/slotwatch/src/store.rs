//! Durable monitoring state shared by every poller.
//!
//! The state file is the single source of truth: it is read once at startup
//! and rewritten in full after every mutation. A mutation is applied to a
//! copy, the copy is flushed to disk, and only then does the in-memory state
//! change, so memory and disk never disagree after a failed write.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::monitoring::TargetId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read state file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write state file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("state file {path} is not a valid state document: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Opaque address of a notification recipient (a chat id for Telegram)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(String);

impl RecipientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecipientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// On-disk layout of the state file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub recipients: BTreeSet<RecipientId>,
    #[serde(default)]
    pub polling_enabled: bool,
    /// `true` while the target is still being probed
    #[serde(default)]
    pub target_active: BTreeMap<TargetId, bool>,
}

impl PersistedState {
    /// Fresh state: polling off, every target active, nobody subscribed
    pub fn for_targets<'a>(ids: impl IntoIterator<Item = &'a TargetId>) -> Self {
        Self {
            target_active: ids.into_iter().map(|id| (id.clone(), true)).collect(),
            ..Self::default()
        }
    }

    pub fn is_target_active(&self, id: &TargetId) -> bool {
        self.target_active.get(id).copied().unwrap_or(true)
    }

    pub fn is_target_pollable(&self, id: &TargetId) -> bool {
        self.polling_enabled && self.is_target_active(id)
    }

    /// Adds missing entries as active. Returns true if anything was added.
    fn register_targets<'a>(&mut self, ids: impl IntoIterator<Item = &'a TargetId>) -> bool {
        let mut added = false;
        for id in ids {
            if !self.target_active.contains_key(id) {
                self.target_active.insert(id.clone(), true);
                added = true;
            }
        }
        added
    }
}

/// Shared, durably persisted monitoring state
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl StateStore {
    /// Load the state file, creating it with defaults when it does not exist.
    ///
    /// Every id in `known_targets` gets an entry; ids present in the file but
    /// unknown to this process are kept untouched.
    pub async fn load<'a>(
        path: impl Into<PathBuf>,
        known_targets: impl IntoIterator<Item = &'a TargetId>,
    ) -> Result<Self, StoreError> {
        let path = path.into();

        let (mut state, mut dirty) = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let state = serde_json::from_str::<PersistedState>(&raw)
                    .map_err(|source| StoreError::Parse { path: path.clone(), source })?;
                debug!(path = %path.display(), "Loaded monitoring state");
                (state, false)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No state file found, creating a fresh one");
                (PersistedState::default(), true)
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        dirty |= state.register_targets(known_targets);
        if dirty {
            write_state(&path, &state).await?;
        }

        Ok(Self { path, state: Mutex::new(state) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `polling_enabled && target_active[id]`, with unknown ids counting as active
    pub async fn is_target_pollable(&self, id: &TargetId) -> bool {
        self.state.lock().await.is_target_pollable(id)
    }

    pub async fn polling_enabled(&self) -> bool {
        self.state.lock().await.polling_enabled
    }

    pub async fn recipients(&self) -> Vec<RecipientId> {
        self.state.lock().await.recipients.iter().cloned().collect()
    }

    pub async fn snapshot(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    /// Mark a target as finished. Sticky until [`Self::reset_all_targets`].
    pub async fn deactivate_target(&self, id: &TargetId) -> Result<(), StoreError> {
        self.mutate(|state| {
            state.target_active.insert(id.clone(), false);
        })
        .await
    }

    pub async fn set_polling_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.mutate(|state| state.polling_enabled = enabled).await
    }

    /// Subscribe a recipient. Returns false if it was already subscribed.
    pub async fn add_recipient(&self, recipient: RecipientId) -> Result<bool, StoreError> {
        let mut inserted = false;
        self.mutate(|state| inserted = state.recipients.insert(recipient)).await?;
        Ok(inserted)
    }

    /// Mark every known target as active again to start a new monitoring cycle
    pub async fn reset_all_targets(&self) -> Result<(), StoreError> {
        self.mutate(|state| state.target_active.values_mut().for_each(|active| *active = true))
            .await
    }

    /// Turn polling off if it is on and every one of `ids` is done.
    ///
    /// Check and write happen under one lock, so concurrent callers see at
    /// most one `true`.
    pub async fn finish_if_all_done<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a TargetId>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if !state.polling_enabled || !ids.into_iter().all(|id| !state.is_target_active(id)) {
            return Ok(false);
        }

        let mut next = state.clone();
        next.polling_enabled = false;
        write_state(&self.path, &next).await?;
        *state = next;
        Ok(true)
    }

    async fn mutate(&self, apply: impl FnOnce(&mut PersistedState)) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        apply(&mut next);
        write_state(&self.path, &next).await?;
        *state = next;
        Ok(())
    }
}

/// Replace the state file atomically: write a sibling temp file, sync it, rename.
async fn write_state(path: &Path, state: &PersistedState) -> Result<(), StoreError> {
    let to_error = |source| StoreError::Write { path: path.to_path_buf(), source };

    let contents = serde_json::to_vec_pretty(state)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(to_error)?;
    }

    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let mut file = tokio::fs::File::create(&tmp_path).await.map_err(to_error)?;
    file.write_all(&contents).await.map_err(to_error)?;
    file.sync_all().await.map_err(to_error)?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await.map_err(to_error)?;
    Ok(())
}
