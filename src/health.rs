//! One-shot query of the relay's `/healthz` endpoint.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::constants::HTTP_REQUEST_TIMEOUT;

/// Relay health report.
#[derive(Debug, Clone, Deserialize)]
pub struct Health {
    /// `"ok"` once the hub's proxy and publisher are running.
    pub status: String,
    /// ZMQ endpoint publishers connect to.
    #[serde(default)]
    pub xsub_bind: Option<String>,
    /// ZMQ endpoint subscribers connect to.
    #[serde(default)]
    pub xpub_bind: Option<String>,
    /// Injection endpoint the relay's own publisher uses.
    #[serde(default)]
    pub inject_connect: Option<String>,
    /// Fan-out bus statistics.
    #[serde(default)]
    pub bus: BusStats,
}

/// Statistics of the relay's internal fan-out bus.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BusStats {
    /// Events published through the bus since startup.
    #[serde(default)]
    pub published: u64,
    /// Events dropped due to slow WebSocket subscribers.
    #[serde(default)]
    pub dropped_ws: u64,
    /// Currently connected event-stream subscribers.
    #[serde(default)]
    pub subscribers: u64,
}

/// Fetch the relay's health report.
///
/// # Errors
///
/// Returns an error on connection failure, a non-2xx status, or a
/// response body that does not parse as a health report.
pub async fn fetch(health_url: &str) -> Result<Health> {
    let client = reqwest::Client::builder()
        .timeout(HTTP_REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(health_url)
        .send()
        .await
        .with_context(|| format!("Health request to {health_url} failed"))?
        .error_for_status()
        .context("Relay returned an error status")?;

    response
        .json::<Health>()
        .await
        .context("Health response did not parse")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_deserializes_relay_shape() {
        let health: Health = serde_json::from_str(
            r#"{"status":"ok","xsub_bind":"tcp://0.0.0.0:5551",
                "xpub_bind":"tcp://0.0.0.0:5552",
                "inject_connect":"tcp://127.0.0.1:5551",
                "bus":{"published":42,"dropped_ws":3,"subscribers":2}}"#,
        )
        .unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.bus.published, 42);
        assert_eq!(health.bus.dropped_ws, 3);
        assert_eq!(health.bus.subscribers, 2);
    }

    #[test]
    fn test_health_tolerates_missing_fields() {
        let health: Health = serde_json::from_str(r#"{"status":"starting"}"#).unwrap();
        assert_eq!(health.status, "starting");
        assert!(health.xsub_bind.is_none());
        assert_eq!(health.bus.published, 0);
    }
}
