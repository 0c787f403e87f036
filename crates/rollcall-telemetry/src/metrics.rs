//! Prometheus metrics recorder and metric name constants.

use ::metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Only one recorder can be
/// installed per process; a second call returns an error.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_all();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

fn describe_all() {
    describe_counter!(WS_CONNECTIONS_TOTAL, "WebSocket sessions registered");
    describe_counter!(WS_DISCONNECTIONS_TOTAL, "WebSocket sessions torn down");
    describe_gauge!(WS_CONNECTIONS_ACTIVE, "Currently registered sessions");
    describe_histogram!(
        WS_CONNECTION_DURATION_SECONDS,
        Unit::Seconds,
        "Lifetime of a WebSocket session"
    );
    describe_counter!(RELAY_MESSAGES_TOTAL, "Inbound messages dispatched, by type");
    describe_counter!(
        RELAY_DELIVERY_FAILURES_TOTAL,
        "Outbound frames that could not be queued"
    );
    describe_counter!(ROSTER_BROADCASTS_TOTAL, "Roster updates fanned out");
    describe_counter!(PROTOCOL_ERRORS_TOTAL, "Inbound frames rejected, by kind");
    describe_counter!(
        WS_REJECTED_TOTAL,
        "Upgrade requests refused at capacity or on peer id conflict"
    );
}

// Metric name constants to avoid typos across crates.

/// WebSocket sessions registered (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket sessions torn down (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Session lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused (counter, labels: reason).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Inbound messages dispatched (counter, labels: type).
pub const RELAY_MESSAGES_TOTAL: &str = "relay_messages_total";
/// Outbound frames that failed to queue (counter).
pub const RELAY_DELIVERY_FAILURES_TOTAL: &str = "relay_delivery_failures_total";
/// Roster broadcasts (counter).
pub const ROSTER_BROADCASTS_TOTAL: &str = "roster_broadcasts_total";
/// Rejected inbound frames (counter, labels: kind).
pub const PROTOCOL_ERRORS_TOTAL: &str = "protocol_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_REJECTED_TOTAL,
            RELAY_MESSAGES_TOTAL,
            RELAY_DELIVERY_FAILURES_TOTAL,
            ROSTER_BROADCASTS_TOTAL,
            PROTOCOL_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name {name} is not snake_case"
            );
        }
    }

    #[test]
    fn render_without_global_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            ::metrics::counter!(ROSTER_BROADCASTS_TOTAL).increment(2);
        });
        let output = render(&handle);
        assert!(output.contains("roster_broadcasts_total 2"));
    }
}
