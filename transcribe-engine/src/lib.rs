//! Dual-pipeline speech-to-text orchestration.
//!
//! Two mutually exclusive recording pipelines over one microphone capture
//! path: a legacy callback-style recognizer fed native-format audio, and a
//! modern streaming analyzer fed through a format adapter and an explicit
//! producer/consumer channel. The engines sit behind narrow trait
//! contracts; everything in this crate is the orchestration around them.

pub mod analyzer;
pub mod app;
pub mod capture;
pub mod channel;
pub mod config;
pub mod convert;
pub mod debug_audio;
pub mod error;
pub mod format;
pub mod model_manager;
pub mod permissions;
pub mod pipeline;
pub mod recognizer;
pub mod session;
pub mod transcript;

pub use analyzer::{AnalyzerHandle, StreamingAnalyzer, WhisperAnalyzer};
pub use app::CompareApp;
pub use capture::{CaptureSource, CpalCapture};
pub use channel::{analyzer_channel, InputReceiver, InputSender};
pub use config::AppConfig;
pub use convert::BufferConverter;
pub use error::SessionError;
pub use format::{AudioBuffer, AudioFormat, SampleFormat};
pub use permissions::{PermissionAuthority, PermissionStatus, SystemPermissions};
pub use pipeline::{LegacyPipeline, ModernPipeline, PipelineKind, SessionState};
pub use recognizer::{LegacyRecognizer, RecognitionRequest, VoskRecognizer};
pub use session::AudioSessionController;
pub use transcript::{Transcript, TranscriptSegment, TranscriptView};
