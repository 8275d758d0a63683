//! Application-wide constants for hubwatch.
//!
//! This module centralizes magic numbers and timing constants so the
//! session, channel, and control logic agree on one set of values.
//! Constants are grouped by domain with documentation explaining their
//! purpose. Most have a matching `Config` knob; these are the defaults.

use std::time::Duration;

// ============================================================================
// Event log
// ============================================================================

/// Maximum number of events retained in the client-side log.
///
/// Matches the relay's per-subscriber queue depth: entries beyond this are
/// evicted oldest-first while the running `total` keeps counting.
pub const EVENT_LOG_CAPACITY: usize = 1000;

// ============================================================================
// Reconnection
// ============================================================================

/// Delay before the first reconnect attempt after a channel closes.
pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Ceiling for the exponential reconnect backoff.
///
/// The delay doubles on every failed attempt and never exceeds this.
/// Reconnection itself never stops; only the spacing grows.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Upper bound (exclusive) of the random jitter added to each reconnect
/// delay, in milliseconds. Spreads out thundering-herd reconnects when many
/// clients lose the same relay.
pub const RECONNECT_JITTER_MS: u64 = 1000;

// ============================================================================
// Control channel
// ============================================================================

/// How long a transmitted publish may wait for its acknowledgement before
/// it is resolved as failed. The relay acks synchronously, so anything this
/// late means the ack was lost.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the transient "published" success indication stays visible
/// before auto-clearing. Failures persist until superseded.
pub const PUBLISH_CLEAR_DELAY: Duration = Duration::from_millis(1000);

/// Interval between keepalive pings sent on the control channel while it is
/// open. Matches the relay's heartbeat interval.
pub const CONTROL_PING_INTERVAL: Duration = Duration::from_secs(15);

// ============================================================================
// HTTP
// ============================================================================

/// Request timeout for the one-shot `/healthz` query.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delays_ordered() {
        assert!(INITIAL_RECONNECT_DELAY < MAX_RECONNECT_DELAY);
        assert!(u64::try_from(INITIAL_RECONNECT_DELAY.as_millis()).unwrap() >= RECONNECT_JITTER_MS);
    }

    #[test]
    fn test_publish_windows_ordered() {
        // The success flash must clear long before a fresh publish could
        // time out, so the two deadlines never race.
        assert!(PUBLISH_CLEAR_DELAY < ACK_TIMEOUT);
    }

    #[test]
    fn test_capacity_positive() {
        assert!(EVENT_LOG_CAPACITY > 0);
    }
}
