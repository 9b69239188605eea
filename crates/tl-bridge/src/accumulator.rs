use std::collections::BTreeMap;
use std::sync::Arc;

use tl_core::config::ChunkOrdering;
use tl_core::types::{InFlight, StreamingMessage};

/// Options controlling how chunks are folded into the in-flight map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulateOptions {
    pub ordering: ChunkOrdering,
    /// Maximum number of open streams; 0 disables the bound.
    pub max_in_flight: usize,
}

impl Default for AccumulateOptions {
    fn default() -> Self {
        Self {
            ordering: ChunkOrdering::Arrival,
            max_in_flight: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulateOutcome {
    /// First chunk of a new stream.
    Started,
    /// Appended to an existing stream.
    Appended,
    /// Chunk index not past the stored one; dropped.
    Stale,
    /// Opening the stream would exceed `max_in_flight`; dropped.
    AtCapacity,
}

impl AccumulateOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, AccumulateOutcome::Started | AccumulateOutcome::Appended)
    }
}

/// Empty in-flight map.
pub fn empty() -> InFlight {
    Arc::new(BTreeMap::new())
}

/// Fold one chunk into the in-flight map in arrival order.
///
/// The input map is left untouched and a new map is returned: the first
/// chunk of a stream is inserted verbatim, later chunks append their text to
/// the stored text and overwrite `chunk_index` / `total_chunks`.
pub fn accumulate(in_flight: &InFlight, stream_id: &str, chunk: StreamingMessage) -> InFlight {
    accumulate_with(in_flight, stream_id, chunk, AccumulateOptions::default()).0
}

/// [`accumulate`] with ordering and capacity rules applied.
///
/// A dropped chunk returns the same `Arc` it was given, so pointer identity
/// still means "nothing changed".
pub fn accumulate_with(
    in_flight: &InFlight,
    stream_id: &str,
    chunk: StreamingMessage,
    options: AccumulateOptions,
) -> (InFlight, AccumulateOutcome) {
    let Some(existing) = in_flight.get(stream_id) else {
        if options.max_in_flight > 0 && in_flight.len() >= options.max_in_flight {
            tracing::warn!(
                stream_id,
                open = in_flight.len(),
                "in-flight stream limit reached, dropping new stream"
            );
            return (Arc::clone(in_flight), AccumulateOutcome::AtCapacity);
        }
        let mut next = (**in_flight).clone();
        next.insert(stream_id.to_string(), chunk);
        return (Arc::new(next), AccumulateOutcome::Started);
    };

    if options.ordering == ChunkOrdering::RejectStale {
        if let (Some(stored), Some(incoming)) = (existing.data.chunk_index, chunk.data.chunk_index) {
            if incoming <= stored {
                tracing::debug!(stream_id, stored, incoming, "stale chunk dropped");
                return (Arc::clone(in_flight), AccumulateOutcome::Stale);
            }
        }
    }

    let mut merged = existing.clone();
    let mut text = existing.data.text_or_empty().to_string();
    text.push_str(chunk.data.text_or_empty());
    merged.data.text = Some(text);
    merged.data.chunk_index = chunk.data.chunk_index;
    merged.data.total_chunks = chunk.data.total_chunks;

    let mut next = (**in_flight).clone();
    next.insert(stream_id.to_string(), merged);
    (Arc::new(next), AccumulateOutcome::Appended)
}
