//! Metric instrument factories for uploadq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"uploadq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for uploadq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("uploadq")
}

/// Counter: URLs offered to the queue.
/// Labels: `mode`, `result` ("accepted" | "rejected" | "duplicate").
pub fn urls_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("uploadq.queue.enqueued")
        .with_description("Number of URLs offered to the queue")
        .build()
}

/// Counter: queue item state transitions.
/// Labels: `from`, `to`.
pub fn queue_transitions() -> Counter<u64> {
    meter()
        .u64_counter("uploadq.queue.transitions")
        .with_description("Number of queue item state transitions")
        .build()
}

/// Counter: expired leases returned to the pool.
pub fn leases_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("uploadq.queue.reclaimed")
        .with_description("Number of expired leases reclaimed")
        .build()
}

/// Counter: SKU generation attempts.
/// Labels: `result` ("ok" | "collision" | "error").
pub fn sku_generated() -> Counter<u64> {
    meter()
        .u64_counter("uploadq.sku.generated")
        .with_description("Number of SKUs generated")
        .build()
}

/// Counter: activity records the audit sink refused.
/// Labels: `action`.
pub fn audit_failures() -> Counter<u64> {
    meter()
        .u64_counter("uploadq.audit.failures")
        .with_description("Activity records that could not be written")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("uploadq.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
