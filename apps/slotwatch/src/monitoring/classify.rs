//! Diagnostic classification of failed probes.
//!
//! Every category is transient: the poller logs it and tries again on its
//! normal schedule. The category only picks the log line.

use std::fmt;
use tracing::warn;

use super::checker::ProbeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// No response within the probe timeout
    Timeout,
    /// The endpoint answered with a non-2xx status
    RemoteError(u16),
    /// No response at all (DNS, refused connection, reset)
    NetworkError,
    /// A response arrived but could not be decoded
    MalformedResponse(String),
    Unknown(String),
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Timeout => write!(f, "timeout"),
            ProbeFailure::RemoteError(status) => write!(f, "server error ({status})"),
            ProbeFailure::NetworkError => write!(f, "network error"),
            ProbeFailure::MalformedResponse(detail) => write!(f, "malformed response: {detail}"),
            ProbeFailure::Unknown(detail) => write!(f, "unknown error: {detail}"),
        }
    }
}

pub fn classify(error: &ProbeError) -> ProbeFailure {
    match error {
        ProbeError::Status(status) => ProbeFailure::RemoteError(status.as_u16()),
        ProbeError::Decode(err) => ProbeFailure::MalformedResponse(err.to_string()),
        ProbeError::Transport(err) => {
            if err.is_timeout() {
                ProbeFailure::Timeout
            } else if let Some(status) = err.status() {
                ProbeFailure::RemoteError(status.as_u16())
            } else if err.is_decode() || err.is_body() {
                ProbeFailure::MalformedResponse(err.to_string())
            } else if err.is_connect() || err.is_request() {
                ProbeFailure::NetworkError
            } else {
                ProbeFailure::Unknown(err.to_string())
            }
        }
    }
}

/// Log a classified failure. Never changes what the caller does next.
pub fn log_failure(target: &str, failure: &ProbeFailure) {
    match failure {
        ProbeFailure::Timeout => {
            warn!(slot = %target, "Request timed out, continuing to poll")
        }
        ProbeFailure::RemoteError(status) => {
            warn!(slot = %target, status, "Server error, continuing to poll")
        }
        ProbeFailure::NetworkError => {
            warn!(slot = %target, "Network error, continuing to poll")
        }
        ProbeFailure::MalformedResponse(detail) => {
            warn!(slot = %target, %detail, "Malformed response, continuing to poll")
        }
        ProbeFailure::Unknown(detail) => {
            warn!(slot = %target, %detail, "Unexpected error, continuing to poll")
        }
    }
}
