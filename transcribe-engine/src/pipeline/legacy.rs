//! Legacy recognizer pipeline.
//!
//! Captured buffers go to the recognition request in the hardware's native
//! format; no adapter sits in this path. One request is outstanding at a
//! time. Teardown order matters: cancel, end audio input (a no-op on a
//! cancelled request, but never skipped), release the session, remove the
//! tap.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capture::CaptureSource;
use crate::error::SessionError;
use crate::format::AudioBuffer;
use crate::permissions::{PermissionAuthority, PermissionStatus};
use crate::recognizer::{LegacyRecognizer, RecognitionRequest};
use crate::session::{AudioSessionController, AudioSessionGuard};
use crate::transcript::TranscriptView;

use super::{publish_started, publish_stopped, spawn_result_consumer, SessionState};

type SharedRequest = Arc<Mutex<Box<dyn RecognitionRequest>>>;

struct ActiveSession {
    guard: AudioSessionGuard,
    feed: JoinHandle<()>,
    results: JoinHandle<()>,
    request: SharedRequest,
}

/// Manager for legacy recognition sessions.
pub struct LegacyPipeline {
    capture: Box<dyn CaptureSource>,
    recognizer: Arc<dyn LegacyRecognizer>,
    permissions: Arc<dyn PermissionAuthority>,
    session: AudioSessionController,
    view: Arc<watch::Sender<TranscriptView>>,
    state: SessionState,
    active: Option<ActiveSession>,
}

impl LegacyPipeline {
    pub fn new(
        capture: Box<dyn CaptureSource>,
        recognizer: Arc<dyn LegacyRecognizer>,
        permissions: Arc<dyn PermissionAuthority>,
        session: AudioSessionController,
        view: Arc<watch::Sender<TranscriptView>>,
    ) -> Self {
        Self {
            capture,
            recognizer,
            permissions,
            session,
            view,
            state: SessionState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Start a legacy recognition session. Rejected unless Idle.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::SessionActive);
        }
        self.state = SessionState::Preparing;

        match self.prepare() {
            Ok(active) => {
                self.active = Some(active);
                self.state = SessionState::Recording;
                info!("legacy pipeline recording");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Idle;
                publish_stopped(&self.view);
                Err(e)
            }
        }
    }

    fn prepare(&mut self) -> Result<ActiveSession, SessionError> {
        publish_started(&self.view);

        if self.permissions.request_microphone() == PermissionStatus::Denied {
            return Err(SessionError::MicrophonePermissionDenied);
        }
        if self.permissions.request_recognition() == PermissionStatus::Denied {
            return Err(SessionError::RecognitionPermissionDenied);
        }

        let guard = self.session.acquire()?;

        let (seg_tx, seg_rx) = mpsc::unbounded_channel();
        let results = spawn_result_consumer(seg_rx, Arc::clone(&self.view));

        let request = match self
            .recognizer
            .start_request(self.capture.native_format(), seg_tx)
        {
            Ok(request) => Arc::new(Mutex::new(request)),
            Err(e) => {
                results.abort();
                return Err(e);
            }
        };

        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.capture.install_tap(capture_tx) {
            results.abort();
            return Err(e);
        }

        let feed = spawn_feed(capture_rx, Arc::clone(&request));

        Ok(ActiveSession {
            guard,
            feed,
            results,
            request,
        })
    }

    /// Stop the session: cancel, end audio input, release the session,
    /// remove the tap. Every step runs regardless of the others.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        let Some(active) = self.active.take() else {
            self.state = SessionState::Idle;
            return Ok(());
        };
        self.state = SessionState::Finalizing;

        // Cancel in-flight buffer feeding before touching the request.
        active.feed.abort();
        let _ = active.feed.await;

        if let Ok(mut request) = active.request.lock() {
            request.cancel();
            request.end_audio();
        }

        drop(active.guard);
        self.capture.remove_tap();

        // Dropping the request releases the last segment sender; the
        // consumer drains and exits.
        drop(active.request);
        let _ = active.results.await;

        publish_stopped(&self.view);
        self.state = SessionState::Idle;
        Ok(())
    }
}

/// Per-session feed task: hand every captured buffer to the request.
/// Per-buffer recognition errors are logged and the buffer dropped.
fn spawn_feed(
    mut capture_rx: mpsc::UnboundedReceiver<AudioBuffer>,
    request: SharedRequest,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(buffer) = capture_rx.recv().await {
            let Ok(mut request) = request.lock() else {
                break;
            };
            if let Err(e) = request.append(&buffer) {
                warn!("recognition error, dropping buffer: {}", e);
            }
        }
    })
}
