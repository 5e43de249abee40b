//! Transcript accumulation state.
//!
//! Finalized text only ever grows by verbatim concatenation of finalized
//! segments; volatile text is a single provisional span that is wholly
//! replaced on every update and cleared the moment a finalized segment
//! arrives.

/// One span of recognized text from an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSegment {
    pub text: String,
    /// Finalized text will not change; non-final text may be revised.
    pub is_final: bool,
}

impl TranscriptSegment {
    pub fn volatile(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Snapshot published to observers after every transcript mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptView {
    pub finalized: String,
    pub volatile: String,
    pub recording: bool,
}

/// Per-session text accumulators.
#[derive(Debug, Default)]
pub struct Transcript {
    finalized: String,
    volatile: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one segment.
    ///
    /// Finalized segments are appended verbatim (engines own their spacing)
    /// and supersede whatever provisional text covered the same audio, so
    /// the volatile span is cleared in the same update.
    pub fn apply(&mut self, segment: &TranscriptSegment) {
        if segment.is_final {
            self.finalized.push_str(&segment.text);
            self.volatile.clear();
        } else {
            self.volatile.clear();
            self.volatile.push_str(&segment.text);
        }
    }

    pub fn reset(&mut self) {
        self.finalized.clear();
        self.volatile.clear();
    }

    pub fn finalized(&self) -> &str {
        &self.finalized
    }

    pub fn volatile(&self) -> &str {
        &self.volatile
    }

    pub fn view(&self, recording: bool) -> TranscriptView {
        TranscriptView {
            finalized: self.finalized.clone(),
            volatile: self.volatile.clone(),
            recording,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_segment_appends_and_clears_volatile() {
        let mut transcript = Transcript::new();
        transcript.apply(&TranscriptSegment::volatile("hel"));
        assert_eq!(transcript.volatile(), "hel");
        assert_eq!(transcript.finalized(), "");

        transcript.apply(&TranscriptSegment::finalized("hello "));
        assert_eq!(transcript.finalized(), "hello ");
        assert_eq!(transcript.volatile(), "");
    }

    #[test]
    fn test_volatile_segment_replaces_wholesale() {
        let mut transcript = Transcript::new();
        transcript.apply(&TranscriptSegment::volatile("one"));
        transcript.apply(&TranscriptSegment::volatile("one two"));
        assert_eq!(transcript.volatile(), "one two");
        assert_eq!(transcript.finalized(), "");
    }

    #[test]
    fn test_consecutive_finals_concatenate_verbatim() {
        let mut transcript = Transcript::new();
        transcript.apply(&TranscriptSegment::finalized("Hello "));
        transcript.apply(&TranscriptSegment::finalized("World"));
        assert_eq!(transcript.finalized(), "Hello World");
        assert_eq!(transcript.volatile(), "");
    }

    #[test]
    fn test_reset_clears_both_accumulators() {
        let mut transcript = Transcript::new();
        transcript.apply(&TranscriptSegment::finalized("done "));
        transcript.apply(&TranscriptSegment::volatile("pending"));
        transcript.reset();
        assert_eq!(transcript.finalized(), "");
        assert_eq!(transcript.volatile(), "");
    }

    #[test]
    fn test_view_snapshot_carries_recording_flag() {
        let mut transcript = Transcript::new();
        transcript.apply(&TranscriptSegment::volatile("hm"));
        let view = transcript.view(true);
        assert_eq!(view.volatile, "hm");
        assert!(view.recording);
    }
}
