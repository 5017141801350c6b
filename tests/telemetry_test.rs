//! Integration tests for telemetry initialization and span helpers.

use uploadq::model::{ActorId, ItemStatus};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = uploadq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "uploadq-test".to_string(),
        log_level: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = uploadq::telemetry::init_telemetry(config);
}

#[test]
fn queue_span_creates_and_records_transition() {
    let span = uploadq::telemetry::queue::start_queue_span("request", ActorId(7));
    uploadq::telemetry::queue::record_state_transition(
        &span,
        42,
        ItemStatus::Available,
        ItemStatus::Assigned,
    );
}

#[test]
fn metric_instruments_are_usable_without_a_provider() {
    uploadq::telemetry::metrics::urls_enqueued().add(1, &[]);
    uploadq::telemetry::metrics::operation_duration_ms().record(1.5, &[]);
}
