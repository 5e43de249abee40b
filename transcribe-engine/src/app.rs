//! Top-level view model.
//!
//! Owns one manager per pipeline plus the shared audio session and watch
//! channel, and forwards user actions (start/stop, pipeline switch) to the
//! currently selected manager.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

use crate::analyzer::{StreamingAnalyzer, WhisperAnalyzer};
use crate::capture::CpalCapture;
use crate::config::AppConfig;
use crate::debug_audio;
use crate::error::SessionError;
use crate::model_manager;
use crate::permissions::{PermissionAuthority, SystemPermissions};
use crate::pipeline::{LegacyPipeline, ModernPipeline, PipelineKind, SessionState};
use crate::recognizer::{LegacyRecognizer, VoskRecognizer};
use crate::session::AudioSessionController;
use crate::transcript::TranscriptView;

/// Where debug recordings land when enabled.
const DEBUG_AUDIO_DIR: &str = "/tmp/speech-compare-debug";

/// Application state: both pipelines and the selection between them.
pub struct CompareApp {
    selected: PipelineKind,
    legacy: LegacyPipeline,
    modern: ModernPipeline,
    view: Arc<watch::Sender<TranscriptView>>,
    locale: String,
}

impl CompareApp {
    /// Wire both pipelines against the real backends.
    pub fn new(config: &AppConfig) -> Result<Self, SessionError> {
        let selected = PipelineKind::from_str(&config.pipeline).unwrap_or_else(|| {
            warn!("unknown pipeline '{}', defaulting to modern", config.pipeline);
            PipelineKind::Modern
        });

        let model_dir = model_manager::expand_model_dir(&config.model_dir)
            .map_err(|e| SessionError::ModelInstall(e.to_string()))?;
        let legacy_model_dir = model_manager::expand_model_dir(&config.legacy_model_dir)
            .map_err(|e| SessionError::ModelInstall(e.to_string()))?;

        let session = AudioSessionController::new();
        let permissions: Arc<dyn PermissionAuthority> = Arc::new(SystemPermissions);
        let (view_tx, _) = watch::channel(TranscriptView::default());
        let view = Arc::new(view_tx);

        let device = config.device.as_deref();
        let legacy_capture = CpalCapture::new(device, config.chunk_frames)?;
        let modern_capture = CpalCapture::new(device, config.chunk_frames)?;

        let recognizer: Arc<dyn LegacyRecognizer> =
            Arc::new(VoskRecognizer::new(legacy_model_dir));
        let analyzer: Arc<dyn StreamingAnalyzer> = Arc::new(WhisperAnalyzer::new(model_dir));

        let debug_dir =
            debug_audio::is_enabled(config.debug_audio).then(|| PathBuf::from(DEBUG_AUDIO_DIR));

        let legacy = LegacyPipeline::new(
            Box::new(legacy_capture),
            recognizer,
            Arc::clone(&permissions),
            session.clone(),
            Arc::clone(&view),
        );
        let modern = ModernPipeline::new(
            Box::new(modern_capture),
            analyzer,
            permissions,
            session,
            Arc::clone(&view),
        )
        .with_feed_bound(config.max_queued_buffers)
        .with_debug_audio(debug_dir);

        Ok(Self {
            selected,
            legacy,
            modern,
            view,
            locale: config.locale.clone(),
        })
    }

    pub fn selected(&self) -> PipelineKind {
        self.selected
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn is_recording(&self) -> bool {
        self.legacy.state() != SessionState::Idle || self.modern.state() != SessionState::Idle
    }

    /// Switch pipelines. Rejected while a session is active.
    pub fn select(&mut self, kind: PipelineKind) -> Result<(), SessionError> {
        if self.is_recording() {
            return Err(SessionError::SessionActive);
        }
        self.selected = kind;
        Ok(())
    }

    /// Start a session on the selected pipeline.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        match self.selected {
            PipelineKind::Legacy => self.legacy.start().await,
            PipelineKind::Modern => {
                let locale = self.locale.clone();
                self.modern.start(&locale).await
            }
        }
    }

    /// Stop the session on the selected pipeline.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        match self.selected {
            PipelineKind::Legacy => self.legacy.stop().await,
            PipelineKind::Modern => self.modern.stop().await,
        }
    }

    /// Observe transcript snapshots.
    pub fn subscribe(&self) -> watch::Receiver<TranscriptView> {
        self.view.subscribe()
    }
}
