use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Text recognised for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptPart {
    /// Chunk this text belongs to (1-based)
    pub chunk_number: u32,

    /// Transcribed text
    pub text: String,

    /// When the response arrived
    pub received_at: DateTime<Utc>,
}

impl TranscriptPart {
    pub fn new(chunk_number: u32, text: impl Into<String>) -> Self {
        Self {
            chunk_number,
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// Highest chunk number accepted. At the default two-minute chunks this is
/// well over a year of audio.
pub const MAX_CHUNK_NUMBER: u32 = 1 << 18;

/// Parts indexed by chunk number. Slot `n - 1` holds chunk `n`, so reading
/// the slots in order always yields capture order, whatever order the
/// responses arrived in.
#[derive(Debug, Clone, Default)]
pub struct TranscriptParts {
    slots: Vec<Option<TranscriptPart>>,
}

impl TranscriptParts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `part` at `chunk_number - 1`, replacing any earlier text for
    /// the same chunk. Chunk number 0 and numbers past
    /// [`MAX_CHUNK_NUMBER`] are rejected.
    pub fn insert(&mut self, part: TranscriptPart) -> bool {
        let Some(index) = (part.chunk_number as usize).checked_sub(1) else {
            warn!("Ignoring transcript part with chunk number 0");
            return false;
        };
        if part.chunk_number > MAX_CHUNK_NUMBER {
            warn!(
                "Ignoring transcript part with chunk number {}",
                part.chunk_number
            );
            return false;
        }

        if self.slots.len() <= index {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(part);
        true
    }

    pub fn get(&self, chunk_number: u32) -> Option<&TranscriptPart> {
        let index = (chunk_number as usize).checked_sub(1)?;
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Received parts in chunk order.
    pub fn iter(&self) -> impl Iterator<Item = &TranscriptPart> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chunk numbers below the highest received one that have no text.
    pub fn gaps(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i as u32 + 1)
            .collect()
    }

    /// Join the received parts with single spaces, in chunk order. Missing
    /// chunks are skipped, so this is valid at any point during recording.
    pub fn combine(&self) -> String {
        self.iter()
            .map(|part| part.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_follows_chunk_order_not_arrival() {
        let mut parts = TranscriptParts::new();
        parts.insert(TranscriptPart::new(3, "three"));
        parts.insert(TranscriptPart::new(1, "one"));
        parts.insert(TranscriptPart::new(2, "two"));
        assert_eq!(parts.combine(), "one two three");
    }

    #[test]
    fn gaps_are_skipped_and_reported() {
        let mut parts = TranscriptParts::new();
        parts.insert(TranscriptPart::new(4, "four"));
        parts.insert(TranscriptPart::new(1, " one "));
        assert_eq!(parts.combine(), "one four");
        assert_eq!(parts.gaps(), vec![2, 3]);
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn zero_chunk_number_is_rejected() {
        let mut parts = TranscriptParts::new();
        assert!(!parts.insert(TranscriptPart::new(0, "nope")));
        assert!(parts.is_empty());
    }

    #[test]
    fn out_of_range_chunk_number_is_rejected() {
        let mut parts = TranscriptParts::new();
        assert!(!parts.insert(TranscriptPart::new(u32::MAX, "far")));
        assert!(!parts.insert(TranscriptPart::new(MAX_CHUNK_NUMBER + 1, "far")));
        assert!(parts.gaps().is_empty());
        assert!(parts.insert(TranscriptPart::new(MAX_CHUNK_NUMBER, "last")));
    }

    #[test]
    fn empty_text_does_not_double_spaces() {
        let mut parts = TranscriptParts::new();
        parts.insert(TranscriptPart::new(1, "a"));
        parts.insert(TranscriptPart::new(2, "   "));
        parts.insert(TranscriptPart::new(3, "b"));
        assert_eq!(parts.combine(), "a b");
    }
}
