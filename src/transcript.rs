//! Transcript buffer: the ordered log of everything a session saw.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the conversation a transcript entry records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A script submitted to the engine.
    Input,
    /// Output captured from the engine (or an installer).
    Output,
}

/// One timestamped transcript entry.
///
/// Entries are appended in call order, so timestamps are non-decreasing
/// within a session. An input entry and the output it produced are not
/// causally ordered: output capture is decoupled from submission by the
/// settle delay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TranscriptEntry {
    /// Entry direction.
    pub kind: EntryKind,
    /// Wall-clock instant the entry was recorded, millisecond precision.
    pub timestamp: DateTime<Utc>,
    /// Entry text. Input entries carry the display script when one was
    /// supplied, else the executed script, always newline-terminated.
    pub content: String,
}

impl TranscriptEntry {
    /// Build an input entry stamped with the given instant.
    #[must_use]
    pub fn input(content: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: EntryKind::Input,
            timestamp,
            content,
        }
    }

    /// Build an output entry stamped with the given instant.
    #[must_use]
    pub fn output(content: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: EntryKind::Output,
            timestamp,
            content,
        }
    }
}

/// Append-only ordered sequence of [`TranscriptEntry`].
///
/// No capacity limit at this layer; bounding happens upstream in the
/// output sink before entries are ever appended here.
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry to the end of the sequence. O(1), never fails.
    pub fn append(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    /// The full ordered sequence.
    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Empty the sequence. Engine and sink state are untouched.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
