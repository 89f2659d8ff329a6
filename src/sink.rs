//! Bounded output sink: the engine's sole output destination.
//!
//! The engine's reader tasks write chunks at arbitrary times relative to
//! submissions, so capture is pull-based: the session calls [`BoundedSink::dump`]
//! when it decides output has settled, then [`BoundedSink::flush`] to open
//! the next epoch.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

/// Placeholder chunk appended once per overflow epoch when the retained
/// chunk cap is exceeded.
pub const TRUNCATION_MARKER: &str = "...";

#[derive(Debug)]
struct SinkState {
    chunks: Vec<Bytes>,
    max_chunks: usize,
}

/// Write-capturing destination with a maximum retained-chunk count.
///
/// Clonable handle over shared state so the engine reader tasks and the
/// owning session can hold it concurrently.
#[derive(Debug, Clone)]
pub struct BoundedSink {
    state: Arc<Mutex<SinkState>>,
}

impl BoundedSink {
    /// Create a sink retaining at most `max_chunks` chunks per epoch.
    #[must_use]
    pub fn new(max_chunks: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                chunks: Vec::new(),
                max_chunks,
            })),
        }
    }

    /// Capture one output chunk.
    ///
    /// Appends `chunk` while fewer than `max_chunks` chunks are retained.
    /// The first write past the cap appends [`TRUNCATION_MARKER`] instead;
    /// every later write in the same epoch is dropped, so truncation is
    /// signaled exactly once per overflow epoch.
    pub fn write(&self, chunk: Bytes) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.chunks.len() < state.max_chunks {
            state.chunks.push(chunk);
        } else if state.chunks.len() == state.max_chunks {
            state.chunks.push(Bytes::from_static(TRUNCATION_MARKER.as_bytes()));
        }
    }

    /// Concatenate all captured chunks into one string without clearing.
    ///
    /// Invalid UTF-8 sequences are replaced rather than rejected; engine
    /// output is untrusted bytes.
    #[must_use]
    pub fn dump(&self) -> String {
        let state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut buf = Vec::with_capacity(state.chunks.iter().map(Bytes::len).sum());
        for chunk in &state.chunks {
            buf.extend_from_slice(chunk);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Clear captured chunks and reset the overflow epoch.
    pub fn flush(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chunks
            .clear();
    }

    /// Whether no chunks are currently captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chunks
            .is_empty()
    }
}
