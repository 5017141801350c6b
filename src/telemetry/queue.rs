//! Queue operation span helpers.

use tracing::Span;

use crate::model::{ActorId, ItemStatus};

/// Start a span for one queue operation.
///
/// The `queue.item` field is declared empty and can be filled once the
/// operation knows which item it touched.
pub fn start_queue_span(operation: &str, actor: ActorId) -> Span {
    tracing::info_span!(
        "queue.operation",
        "queue.operation" = operation,
        "queue.actor" = %actor,
        "queue.item" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, item: i64, from: ItemStatus, to: ItemStatus) {
    span.record("queue.item", item);
    span.in_scope(|| {
        tracing::info!(item, from = %from, to = %to, "state_transition");
    });
}
