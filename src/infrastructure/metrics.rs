use std::sync::LazyLock;

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Process-wide metrics registry. All four series the engine exposes are
/// registered once, lazily, against this registry.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static ACTIVE_ROOMS: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("collab_active_rooms", "Number of currently active rooms")
        .expect("collab_active_rooms metric definition is valid");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("collab_active_rooms registers exactly once");
    gauge
});

pub static CONNECTED_CLIENTS: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        "collab_connected_clients",
        "Number of locally attached client sockets across all rooms",
    )
    .expect("collab_connected_clients metric definition is valid");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("collab_connected_clients registers exactly once");
    gauge
});

pub static UPDATES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "collab_updates_total",
        "Total CRDT updates applied to any room's document, local or bus-originated",
    )
    .expect("collab_updates_total metric definition is valid");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("collab_updates_total registers exactly once");
    counter
});

pub static MESSAGES_SENT_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "collab_messages_sent_total",
        "Total outbound socket sends across all rooms",
    )
    .expect("collab_messages_sent_total metric definition is valid");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("collab_messages_sent_total registers exactly once");
    counter
});

/// Render the registry in the standard Prometheus exposition text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "metrics_encode_failed");
        return String::from("# failed to encode metrics\n");
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!(error = %e, "metrics_buffer_not_utf8");
        String::from("# invalid utf-8 in metrics buffer\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathered_text_contains_all_four_series() {
        ACTIVE_ROOMS.set(1);
        CONNECTED_CLIENTS.set(2);
        UPDATES_TOTAL.inc();
        MESSAGES_SENT_TOTAL.inc();

        let text = gather();
        assert!(text.contains("collab_active_rooms"));
        assert!(text.contains("collab_connected_clients"));
        assert!(text.contains("collab_updates_total"));
        assert!(text.contains("collab_messages_sent_total"));
    }
}
