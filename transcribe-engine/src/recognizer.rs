//! Legacy callback-style recognition, reshaped as a segment stream.
//!
//! The legacy engine accepts audio in whatever format the hardware
//! produces, so no format adapter sits in this path. Its multi-shot result
//! callback is expressed as a single-consumer channel of
//! [`TranscriptSegment`]s: partial results arrive as volatile segments,
//! utterance boundaries as finalized ones.

use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::format::{AudioBuffer, AudioFormat};
use crate::transcript::TranscriptSegment;

/// Factory for legacy recognition requests.
pub trait LegacyRecognizer: Send + Sync {
    /// Open a streaming request bound to the given input format. Results
    /// flow through `results` until the request is ended or cancelled.
    /// Callers keep at most one request outstanding.
    fn start_request(
        &self,
        format: AudioFormat,
        results: mpsc::UnboundedSender<TranscriptSegment>,
    ) -> Result<Box<dyn RecognitionRequest>, SessionError>;
}

/// One outstanding streaming recognition request.
pub trait RecognitionRequest: Send {
    /// Feed one captured buffer. Errors are per-buffer; the request stays
    /// usable.
    fn append(&mut self, buffer: &AudioBuffer) -> Result<(), SessionError>;

    /// Signal end of audio, flushing a last finalized result. No-op on a
    /// cancelled or already-ended request, but callers invoke it
    /// unconditionally during teardown.
    fn end_audio(&mut self);

    /// Cancel the request; no further segments are emitted. Idempotent.
    fn cancel(&mut self);
}

#[cfg(feature = "vosk")]
mod vosk_impl {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use tokio::sync::mpsc;
    use tracing::{debug, info};
    use vosk::{Model, Recognizer};

    use super::{LegacyRecognizer, RecognitionRequest};
    use crate::error::SessionError;
    use crate::format::{AudioBuffer, AudioFormat};
    use crate::transcript::TranscriptSegment;

    /// Vosk-backed legacy recognizer.
    ///
    /// The model is loaded on the first request so a missing model surfaces
    /// as a start error instead of failing application construction.
    pub struct VoskRecognizer {
        model_path: PathBuf,
        model: Mutex<Option<Model>>,
    }

    impl VoskRecognizer {
        pub fn new(model_path: impl Into<PathBuf>) -> Self {
            Self {
                model_path: model_path.into(),
                model: Mutex::new(None),
            }
        }

        fn with_model<T>(
            &self,
            f: impl FnOnce(&Model) -> Result<T, SessionError>,
        ) -> Result<T, SessionError> {
            let mut slot = self.model.lock().map_err(|e| {
                SessionError::EngineUnavailable(format!("model lock poisoned: {}", e))
            })?;
            if slot.is_none() {
                info!("loading vosk model from {}", self.model_path.display());
                let path = self.model_path.to_string_lossy().into_owned();
                let model = Model::new(path.as_str()).ok_or_else(|| {
                    SessionError::EngineUnavailable(format!(
                        "failed to load vosk model at {}",
                        self.model_path.display()
                    ))
                })?;
                *slot = Some(model);
            }
            f(slot.as_ref().unwrap())
        }
    }

    impl LegacyRecognizer for VoskRecognizer {
        fn start_request(
            &self,
            format: AudioFormat,
            results: mpsc::UnboundedSender<TranscriptSegment>,
        ) -> Result<Box<dyn RecognitionRequest>, SessionError> {
            let recognizer = self.with_model(|model| {
                Recognizer::new(model, format.sample_rate as f32).ok_or_else(|| {
                    SessionError::EngineUnavailable(format!(
                        "failed to create recognizer at {}Hz",
                        format.sample_rate
                    ))
                })
            })?;

            let mut request = VoskRequest {
                recognizer,
                results,
                last_partial: String::new(),
                ended: false,
                cancelled: false,
            };
            request.prime(format.sample_rate);
            debug!("legacy recognition request opened at {}", format);
            Ok(Box::new(request))
        }
    }

    struct VoskRequest {
        recognizer: Recognizer,
        results: mpsc::UnboundedSender<TranscriptSegment>,
        last_partial: String,
        ended: bool,
        cancelled: bool,
    }

    impl VoskRequest {
        /// Warm the decoder with a short stretch of silence so the first
        /// real buffer is not spent on initialization.
        fn prime(&mut self, sample_rate: u32) {
            let silence = vec![0i16; sample_rate as usize / 10];
            let _ = self.recognizer.accept_waveform(&silence);
        }

        fn emit_final(&mut self) {
            let result = self.recognizer.final_result();
            if let Some(finalized) = result.single() {
                let text = finalized.text.trim().to_string();
                if !text.is_empty() {
                    let _ = self
                        .results
                        .send(TranscriptSegment::finalized(format!("{} ", text)));
                }
            }
        }
    }

    impl RecognitionRequest for VoskRequest {
        fn append(&mut self, buffer: &AudioBuffer) -> Result<(), SessionError> {
            if self.ended || self.cancelled {
                return Ok(());
            }

            let samples = buffer.mono_i16();
            let state = self
                .recognizer
                .accept_waveform(&samples)
                .map_err(|e| SessionError::EngineUnavailable(format!("decoder error: {}", e)))?;

            if state == vosk::DecodingState::Finalized {
                let result = self.recognizer.result();
                if let Some(finalized) = result.single() {
                    let text = finalized.text.trim().to_string();
                    if !text.is_empty() {
                        let _ = self
                            .results
                            .send(TranscriptSegment::finalized(format!("{} ", text)));
                    }
                }
                self.last_partial.clear();
            } else {
                let partial = self.recognizer.partial_result();
                let text = partial.partial.trim().to_string();
                if !text.is_empty() && text != self.last_partial {
                    self.last_partial = text.clone();
                    let _ = self.results.send(TranscriptSegment::volatile(text));
                }
            }

            Ok(())
        }

        fn end_audio(&mut self) {
            if self.ended || self.cancelled {
                return;
            }
            self.ended = true;
            self.emit_final();
        }

        fn cancel(&mut self) {
            self.cancelled = true;
        }
    }
}

#[cfg(feature = "vosk")]
pub use vosk_impl::VoskRecognizer;

// Stub when the feature is disabled: construction succeeds, starting a
// request reports the engine as unavailable.
#[cfg(not(feature = "vosk"))]
pub struct VoskRecognizer;

#[cfg(not(feature = "vosk"))]
impl VoskRecognizer {
    pub fn new(_model_path: impl Into<std::path::PathBuf>) -> Self {
        Self
    }
}

#[cfg(not(feature = "vosk"))]
impl LegacyRecognizer for VoskRecognizer {
    fn start_request(
        &self,
        _format: AudioFormat,
        _results: mpsc::UnboundedSender<TranscriptSegment>,
    ) -> Result<Box<dyn RecognitionRequest>, SessionError> {
        Err(SessionError::EngineUnavailable(
            "vosk support not compiled in; rebuild with --features vosk".to_string(),
        ))
    }
}
