use std::sync::Arc;

use tl_core::types::{ChatMessage, InFlight, MessageLog};

/// Result of closing a stream.
#[derive(Debug, Clone)]
pub struct Finalized {
    pub messages: MessageLog,
    pub in_flight: InFlight,
    /// `false` when the stream was unknown and nothing changed.
    pub appended: bool,
}

/// Close `stream_id`: move its accumulated message into the message list.
///
/// The completion's text replaces the accumulated text when it carries one.
/// The finalized message always has `is_streaming == Some(false)` and goes to
/// the end of the list, so list order is finalization order. An unknown
/// stream id is a no-op and hands back the inputs unchanged.
pub fn finalize(
    stream_id: &str,
    completion: &ChatMessage,
    in_flight: &InFlight,
    messages: &MessageLog,
) -> Finalized {
    let Some(accumulated) = in_flight.get(stream_id) else {
        tracing::debug!(stream_id, "completion for unknown stream ignored");
        return Finalized {
            messages: Arc::clone(messages),
            in_flight: Arc::clone(in_flight),
            appended: false,
        };
    };

    let mut message = accumulated.clone();
    if let Some(text) = &completion.data.text {
        message.data.text = Some(text.clone());
    }
    message.data.is_streaming = Some(false);

    let mut next_messages = Vec::with_capacity(messages.len() + 1);
    next_messages.extend(messages.iter().cloned());
    next_messages.push(message);

    let mut next_in_flight = (**in_flight).clone();
    next_in_flight.remove(stream_id);

    Finalized {
        messages: Arc::new(next_messages),
        in_flight: Arc::new(next_in_flight),
        appended: true,
    }
}
