//! Continuity check for the 8-bit frame sequence counter.
//!
//! This only counts frames that never arrived. Nothing is buffered or reordered.

use tracing::warn;

#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub struct GapReport {
    /// Frames missing between the expected and the observed sequence number
    pub dropped: u32,
    pub expected: u8,
    pub seen: u8,
}

/// Running state of one logical connection. Each connection needs its own cursor.
#[derive(Debug, Default, Clone)]
pub struct SequenceCursor {
    last: Option<u8>,
}

impl SequenceCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }

    /// Forgets the last sequence number, the next observation seeds the cursor again
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Records `seq`, reporting a gap if it is not the successor of the previous one.
    /// The cursor always resynchronizes to `seq`.
    pub fn observe(&mut self, seq: u8) -> Option<GapReport> {
        let last = self.last.replace(seq)?;
        let expected = last.wrapping_add(1);
        if seq == expected {
            return None;
        }
        let report = GapReport {
            dropped: seq.wrapping_sub(expected) as u32,
            expected,
            seen: seq,
        };
        warn!(
            dropped = report.dropped,
            seq, expected, "Sequence mismatch, frames dropped"
        );
        Some(report)
    }
}
