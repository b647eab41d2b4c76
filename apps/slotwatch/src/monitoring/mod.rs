/// Monitoring engine - probes booking targets until they succeed
///
/// This module is responsible for:
/// - Describing targets and how to read their responses
/// - Sending probes and classifying failed ones
/// - Running one retry loop per target
/// - Validating monitoring settings
pub mod checker;
pub mod classify;
pub mod poller;
pub mod registry;
pub mod types;
pub mod validation;

pub use checker::{HttpProber, ProbeError, Prober};
pub use classify::{ProbeFailure, classify};
pub use poller::{PollerExit, TargetPoller};
pub use registry::{Registry, RegistryError};
pub use types::{BoolField, ProbeOutcome, SuccessPredicate, Target, TargetId};
