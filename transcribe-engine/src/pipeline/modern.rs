//! Streaming analyzer pipeline.
//!
//! Idle → Preparing → Recording → Finalizing → Idle. Preparing resolves
//! the analyzer's preferred format, checks (and if needed installs) the
//! locale's model, opens the analyzer input channel, and starts result
//! consumption. Recording converts every captured buffer and publishes it.
//! Finalizing removes the tap and releases the session unconditionally,
//! closes the producer end, then awaits the analyzer's drain.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::analyzer::{AnalyzerHandle, StreamingAnalyzer};
use crate::capture::CaptureSource;
use crate::channel::{analyzer_channel, InputSender};
use crate::convert::BufferConverter;
use crate::debug_audio::DebugAudioSink;
use crate::error::SessionError;
use crate::format::{AudioBuffer, AudioFormat};
use crate::permissions::{PermissionAuthority, PermissionStatus};
use crate::session::{AudioSessionController, AudioSessionGuard};
use crate::transcript::TranscriptView;

use super::{publish_started, publish_stopped, spawn_result_consumer, SessionState};

/// Counters from one session's feed task.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedStats {
    pub fed: u64,
    pub dropped: u64,
    pub conversion_failures: u64,
}

struct ActiveSession {
    guard: AudioSessionGuard,
    feed: JoinHandle<FeedStats>,
    results: JoinHandle<()>,
    analysis: AnalyzerHandle,
}

/// Manager for streaming transcription sessions.
pub struct ModernPipeline {
    capture: Box<dyn CaptureSource>,
    analyzer: Arc<dyn StreamingAnalyzer>,
    permissions: Arc<dyn PermissionAuthority>,
    session: AudioSessionController,
    view: Arc<watch::Sender<TranscriptView>>,
    feed_bound: Option<usize>,
    debug_audio_dir: Option<PathBuf>,
    state: SessionState,
    active: Option<ActiveSession>,
}

impl ModernPipeline {
    pub fn new(
        capture: Box<dyn CaptureSource>,
        analyzer: Arc<dyn StreamingAnalyzer>,
        permissions: Arc<dyn PermissionAuthority>,
        session: AudioSessionController,
        view: Arc<watch::Sender<TranscriptView>>,
    ) -> Self {
        Self {
            capture,
            analyzer,
            permissions,
            session,
            view,
            feed_bound: None,
            debug_audio_dir: None,
            state: SessionState::Idle,
            active: None,
        }
    }

    /// Cap the analyzer intake queue (drop-newest past the bound).
    pub fn with_feed_bound(mut self, bound: Option<usize>) -> Self {
        self.feed_bound = bound;
        self
    }

    /// Mirror the analyzer feed to WAV files under `dir`.
    pub fn with_debug_audio(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_audio_dir = dir;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Start a streaming session for `locale`.
    ///
    /// Rejected unless the manager is Idle. Any preparation failure aborts
    /// the session, unwinds acquired resources, and resets the recording
    /// flag.
    pub async fn start(&mut self, locale: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::SessionActive);
        }
        self.state = SessionState::Preparing;

        match self.prepare(locale).await {
            Ok(active) => {
                self.active = Some(active);
                self.state = SessionState::Recording;
                info!("modern pipeline recording ('{}')", locale);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Idle;
                publish_stopped(&self.view);
                Err(e)
            }
        }
    }

    async fn prepare(&mut self, locale: &str) -> Result<ActiveSession, SessionError> {
        publish_started(&self.view);

        if self.permissions.request_microphone() == PermissionStatus::Denied {
            return Err(SessionError::MicrophonePermissionDenied);
        }
        if self.permissions.request_recognition() == PermissionStatus::Denied {
            return Err(SessionError::RecognitionPermissionDenied);
        }

        // Locale membership is terminal and checked before any audio
        // resource is touched.
        if !self.analyzer.supported_locales().iter().any(|l| l == locale) {
            return Err(SessionError::LocaleUnsupported(locale.to_string()));
        }

        if !self.analyzer.is_installed(locale) {
            info!("model for '{}' not installed, installing", locale);
            let analyzer = Arc::clone(&self.analyzer);
            let install_locale = locale.to_string();
            tokio::task::spawn_blocking(move || analyzer.install(&install_locale))
                .await
                .map_err(|e| SessionError::ModelInstall(e.to_string()))??;
        }

        let guard = self.session.acquire()?;
        let target = self.analyzer.preferred_format();

        let (input_tx, input_rx) = analyzer_channel(self.feed_bound);
        let (seg_tx, seg_rx) = mpsc::unbounded_channel();
        let results = spawn_result_consumer(seg_rx, Arc::clone(&self.view));

        let analysis = match self.analyzer.start(locale, input_rx, seg_tx) {
            Ok(handle) => handle,
            Err(e) => {
                results.abort();
                return Err(e);
            }
        };

        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.capture.install_tap(capture_tx) {
            // Close the intake so the analyzer drains out before we leave.
            drop(input_tx);
            let _ = analysis.finish().await;
            results.abort();
            return Err(e);
        }

        let feed = spawn_feed(capture_rx, input_tx, target, self.debug_audio_dir.clone());

        Ok(ActiveSession {
            guard,
            feed,
            results,
            analysis,
        })
    }

    /// Stop the session and drain the analyzer.
    ///
    /// The tap and the audio session are released before finalization, so
    /// cleanup happens even when the engine's drain fails; that failure is
    /// still reported to the caller.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        let Some(active) = self.active.take() else {
            self.state = SessionState::Idle;
            return Ok(());
        };
        self.state = SessionState::Finalizing;

        self.capture.remove_tap();
        drop(active.guard);

        // Tap removal closed the capture channel; the feed drains what is
        // already queued and its exit closes the producer end of the
        // analyzer intake.
        let stats = active.feed.await.unwrap_or_default();
        if stats.dropped > 0 || stats.conversion_failures > 0 {
            warn!(
                "feed losses: {} dropped by overflow policy, {} conversion failures",
                stats.dropped, stats.conversion_failures
            );
        }
        info!("fed {} buffers to the analyzer", stats.fed);

        let outcome = active.analysis.finish().await;
        if let Err(e) = &outcome {
            warn!("analyzer finalization failed: {}", e);
        }

        // Analysis ending dropped the last segment sender; the consumer
        // drains the remainder and exits.
        let _ = active.results.await;

        publish_stopped(&self.view);
        self.state = SessionState::Idle;
        outcome
    }
}

/// Per-session feed task: convert each captured buffer to the analyzer's
/// format and publish it. Conversion failures drop the buffer and keep the
/// session alive.
fn spawn_feed(
    mut capture_rx: mpsc::UnboundedReceiver<AudioBuffer>,
    input: InputSender,
    target: AudioFormat,
    debug_dir: Option<PathBuf>,
) -> JoinHandle<FeedStats> {
    tokio::spawn(async move {
        let mut converter = BufferConverter::new();
        let mut stats = FeedStats::default();
        let mut sink = debug_dir.as_deref().and_then(|dir| {
            DebugAudioSink::create(dir, &target)
                .map_err(|e| warn!("debug audio disabled: {}", e))
                .ok()
        });

        while let Some(buffer) = capture_rx.recv().await {
            let converted = match converter.convert(buffer, &target) {
                Ok(converted) => converted,
                Err(e) => {
                    stats.conversion_failures += 1;
                    warn!("dropping buffer, conversion failed: {}", e);
                    continue;
                }
            };

            let mut sink_failed = false;
            if let Some(s) = sink.as_mut() {
                if let Err(e) = s.write(&converted) {
                    warn!("debug audio write failed, disabling: {}", e);
                    sink_failed = true;
                }
            }
            if sink_failed {
                sink = None;
            }

            if input.publish(converted) {
                stats.fed += 1;
            } else {
                stats.dropped += 1;
            }
        }

        if let Some(s) = sink {
            if let Err(e) = s.finalize("modern", stats.fed, stats.dropped, stats.conversion_failures)
            {
                warn!("failed to finalize debug audio: {}", e);
            }
        }

        stats
    })
}
