use uuid::Uuid;

/// Generate an OpenTelemetry-compatible trace ID (32 hex characters).
pub fn generate_trace_id() -> String {
    // A UUID without hyphens is exactly 32 hex chars.
    Uuid::new_v4().as_simple().to_string()
}

/// Span covering the handling of one inbound event.
///
/// Returns the span and its trace id so the caller can attach the id to
/// anything it emits for this event.
pub fn event_span(channel: &str, topic: &str) -> (tracing::Span, String) {
    let trace_id = generate_trace_id();
    let span = tracing::debug_span!(
        "inbound_event",
        trace_id = %trace_id,
        channel = %channel,
        topic = %topic,
    );
    (span, trace_id)
}

/// Span for a subscription lifecycle step (connect, reconnect, teardown).
pub fn lifecycle_span(task_id: &str, step: &str) -> tracing::Span {
    tracing::info_span!("subscription", task_id = %task_id, step = %step)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_format() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_event_span_creation() {
        let (span, trace_id) = event_span("task-t1", "update");
        assert_eq!(trace_id.len(), 32);
        let _guard = span.enter();
    }

    #[test]
    fn test_trace_ids_are_unique() {
        assert_ne!(generate_trace_id(), generate_trace_id());
    }

    #[test]
    fn test_lifecycle_span_creation() {
        let span = lifecycle_span("t1", "connect");
        let _guard = span.enter();
    }
}
