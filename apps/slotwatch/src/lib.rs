//! slotwatch - polls booking endpoints until a slot is secured
//!
//! Each configured target gets its own retry loop that POSTs a booking
//! request at a fixed interval until the endpoint reports success. Progress
//! is persisted so a restart neither re-books finished targets nor forgets
//! subscribers, and every success is announced exactly once.

pub mod config;
pub mod console;
pub mod monitoring;
pub mod notify;
pub mod orchestrator;
pub mod status;
pub mod store;

pub use orchestrator::Orchestrator;
pub use store::{PersistedState, RecipientId, StateStore, StoreError};
