//! Validation of monitoring settings before anything is scheduled.

use anyhow::{Result, anyhow};
use url::Url;

/// Shortest accepted interval between probes of one target
pub const MIN_INTERVAL: u64 = 5;
/// Longest accepted interval (24 hours)
pub const MAX_INTERVAL: u64 = 86400;

/// Validate a booking endpoint URL
pub fn validate_target_url(target: &str) -> Result<()> {
    let url = Url::parse(target).map_err(|e| anyhow!("Invalid URL {}: {}", target, e))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("Invalid scheme for booking endpoint: {}", other)),
    }

    if url.host_str().is_none() {
        return Err(anyhow!("Booking endpoint has no host: {}", target));
    }

    if url.scheme() == "http" {
        tracing::warn!("Booking endpoint {} is not using TLS", target);
    }

    Ok(())
}

/// Validate check interval
pub fn validate_check_interval(interval_seconds: u64) -> Result<()> {
    if interval_seconds < MIN_INTERVAL {
        return Err(anyhow!(
            "Check interval too short: {} seconds (minimum: {})",
            interval_seconds,
            MIN_INTERVAL
        ));
    }

    if interval_seconds > MAX_INTERVAL {
        return Err(anyhow!(
            "Check interval too long: {} seconds (maximum: {})",
            interval_seconds,
            MAX_INTERVAL
        ));
    }

    Ok(())
}

/// Validate timeout is reasonable
pub fn validate_timeout(timeout_seconds: u64) -> Result<()> {
    const MIN_TIMEOUT: u64 = 1;
    const MAX_TIMEOUT: u64 = 300; // 5 minutes

    if timeout_seconds < MIN_TIMEOUT {
        return Err(anyhow!(
            "Timeout too short: {} seconds (minimum: {})",
            timeout_seconds,
            MIN_TIMEOUT
        ));
    }

    if timeout_seconds > MAX_TIMEOUT {
        return Err(anyhow!(
            "Timeout too long: {} seconds (maximum: {})",
            timeout_seconds,
            MAX_TIMEOUT
        ));
    }

    Ok(())
}
