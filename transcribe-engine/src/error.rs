//! Session error kinds.
//!
//! Start-path failures abort the session and reset the recording flag; none
//! are retried automatically. Mid-session conversion failures are handled by
//! the pipelines (drop-and-continue) and never surface through this type
//! until stop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("microphone permission denied")]
    MicrophonePermissionDenied,

    #[error("speech recognition permission denied")]
    RecognitionPermissionDenied,

    #[error("locale '{0}' is not supported by the engine")]
    LocaleUnsupported(String),

    #[error("recognition engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("failed to construct format converter: {0}")]
    ConverterConstruction(String),

    #[error("conversion output of {frames} frames exceeds addressable capacity")]
    ConversionCapacity { frames: u64 },

    #[error("format conversion failed: {0}")]
    ConversionFailed(String),

    #[error("audio session failure: {0}")]
    AudioSession(String),

    #[error("audio capture failed to start: {0}")]
    CaptureStart(String),

    #[error("a recording session is already active")]
    SessionActive,

    #[error("model install failed: {0}")]
    ModelInstall(String),
}
