//! Session lifecycle tests for both pipelines, driven by scripted engines
//! and a scripted capture source.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use transcribe_engine::analyzer::{AnalyzerHandle, StreamingAnalyzer};
use transcribe_engine::capture::CaptureSource;
use transcribe_engine::channel::InputReceiver;
use transcribe_engine::error::SessionError;
use transcribe_engine::format::{AudioBuffer, AudioFormat};
use transcribe_engine::permissions::{PermissionAuthority, PermissionStatus};
use transcribe_engine::pipeline::{LegacyPipeline, ModernPipeline, SessionState};
use transcribe_engine::recognizer::{LegacyRecognizer, RecognitionRequest};
use transcribe_engine::session::AudioSessionController;
use transcribe_engine::transcript::{TranscriptSegment, TranscriptView};

/// Observable state of a scripted capture source.
#[derive(Default)]
struct CaptureProbe {
    tap: Mutex<Option<mpsc::UnboundedSender<AudioBuffer>>>,
    install_attempts: AtomicUsize,
}

impl CaptureProbe {
    fn is_tapped(&self) -> bool {
        self.tap.lock().unwrap().is_some()
    }

    fn install_attempts(&self) -> usize {
        self.install_attempts.load(Ordering::SeqCst)
    }

    fn send(&self, buffer: AudioBuffer) -> bool {
        match self.tap.lock().unwrap().as_ref() {
            Some(tx) => tx.send(buffer).is_ok(),
            None => false,
        }
    }
}

struct ScriptedCapture {
    format: AudioFormat,
    probe: Arc<CaptureProbe>,
}

impl ScriptedCapture {
    fn new(format: AudioFormat) -> (Self, Arc<CaptureProbe>) {
        let probe = Arc::new(CaptureProbe::default());
        (
            Self {
                format,
                probe: Arc::clone(&probe),
            },
            probe,
        )
    }
}

impl CaptureSource for ScriptedCapture {
    fn native_format(&self) -> AudioFormat {
        self.format
    }

    fn install_tap(&mut self, tx: mpsc::UnboundedSender<AudioBuffer>) -> Result<(), SessionError> {
        self.probe.install_attempts.fetch_add(1, Ordering::SeqCst);
        let mut tap = self.probe.tap.lock().unwrap();
        if tap.is_some() {
            return Err(SessionError::CaptureStart("tap already installed".to_string()));
        }
        *tap = Some(tx);
        Ok(())
    }

    fn remove_tap(&mut self) {
        self.probe.tap.lock().unwrap().take();
    }

    fn is_tapped(&self) -> bool {
        self.probe.is_tapped()
    }
}

struct ScriptedPermissions {
    microphone: PermissionStatus,
    recognition: PermissionStatus,
}

impl ScriptedPermissions {
    fn granted() -> Arc<Self> {
        Arc::new(Self {
            microphone: PermissionStatus::Granted,
            recognition: PermissionStatus::Granted,
        })
    }
}

impl PermissionAuthority for ScriptedPermissions {
    fn request_microphone(&self) -> PermissionStatus {
        self.microphone
    }

    fn request_recognition(&self) -> PermissionStatus {
        self.recognition
    }
}

/// Analyzer that emits a scripted segment sequence at start, records every
/// buffer it consumes, and optionally fails its drain.
struct ScriptedAnalyzer {
    locales: Vec<String>,
    installed: AtomicBool,
    install_calls: AtomicUsize,
    fail_finalize: bool,
    segments: Mutex<Vec<TranscriptSegment>>,
    received: Arc<Mutex<Vec<(AudioFormat, usize)>>>,
}

impl ScriptedAnalyzer {
    fn new(segments: Vec<TranscriptSegment>) -> Self {
        Self {
            locales: vec!["en".to_string()],
            installed: AtomicBool::new(true),
            install_calls: AtomicUsize::new(0),
            fail_finalize: false,
            segments: Mutex::new(segments),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn not_installed(self) -> Self {
        self.installed.store(false, Ordering::SeqCst);
        self
    }

    fn failing_finalize(mut self) -> Self {
        self.fail_finalize = true;
        self
    }

    fn install_calls(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }

    fn received(&self) -> Vec<(AudioFormat, usize)> {
        self.received.lock().unwrap().clone()
    }
}

impl StreamingAnalyzer for ScriptedAnalyzer {
    fn preferred_format(&self) -> AudioFormat {
        AudioFormat::mono_f32(16000)
    }

    fn supported_locales(&self) -> Vec<String> {
        self.locales.clone()
    }

    fn is_installed(&self, _locale: &str) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    fn install(&self, _locale: &str) -> Result<(), SessionError> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn start(
        &self,
        _locale: &str,
        mut input: InputReceiver,
        results: mpsc::UnboundedSender<TranscriptSegment>,
    ) -> Result<AnalyzerHandle, SessionError> {
        let segments: Vec<_> = self.segments.lock().unwrap().drain(..).collect();
        let received = Arc::clone(&self.received);
        let fail = self.fail_finalize;

        let task = tokio::spawn(async move {
            for segment in segments {
                let _ = results.send(segment);
            }
            while let Some(buffer) = input.recv().await {
                received
                    .lock()
                    .unwrap()
                    .push((buffer.format(), buffer.frames()));
            }
            if fail {
                Err(SessionError::EngineUnavailable("drain failed".to_string()))
            } else {
                Ok(())
            }
        });
        Ok(AnalyzerHandle::from_task(task))
    }
}

fn modern_fixture(
    analyzer: Arc<ScriptedAnalyzer>,
) -> (
    ModernPipeline,
    Arc<CaptureProbe>,
    AudioSessionController,
    watch::Receiver<TranscriptView>,
) {
    let (capture, probe) = ScriptedCapture::new(AudioFormat::mono_f32(48000));
    let session = AudioSessionController::new();
    let (view_tx, view_rx) = watch::channel(TranscriptView::default());
    let pipeline = ModernPipeline::new(
        Box::new(capture),
        analyzer,
        ScriptedPermissions::granted(),
        session.clone(),
        Arc::new(view_tx),
    );
    (pipeline, probe, session, view_rx)
}

async fn wait_for_view(
    rx: &mut watch::Receiver<TranscriptView>,
    predicate: impl Fn(&TranscriptView) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if predicate(&rx.borrow()) {
                return;
            }
            rx.changed().await.expect("view channel closed");
        }
    })
    .await
    .expect("timed out waiting for transcript view");
}

fn capture_buffer(frames: usize) -> AudioBuffer {
    AudioBuffer::from_f32(AudioFormat::mono_f32(48000), vec![0.1; frames])
}

#[tokio::test]
async fn test_start_resets_transcript_state() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![TranscriptSegment::finalized(
        "earlier text ",
    )]));
    let (mut pipeline, _probe, _session, mut view) = modern_fixture(analyzer);

    pipeline.start("en").await.unwrap();
    wait_for_view(&mut view, |v| v.finalized == "earlier text ").await;
    pipeline.stop().await.unwrap();
    assert!(!view.borrow().recording);

    // Second session: the accumulators are empty again before any result.
    pipeline.start("en").await.unwrap();
    let snapshot = view.borrow().clone();
    assert_eq!(snapshot.finalized, "");
    assert_eq!(snapshot.volatile, "");
    assert!(snapshot.recording);

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_final_segments_concatenate_and_clear_volatile() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![
        TranscriptSegment::volatile("Hel"),
        TranscriptSegment::finalized("Hello "),
        TranscriptSegment::finalized("World"),
    ]));
    let (mut pipeline, _probe, _session, mut view) = modern_fixture(analyzer);

    pipeline.start("en").await.unwrap();
    wait_for_view(&mut view, |v| v.finalized == "Hello World").await;
    assert_eq!(view.borrow().volatile, "");

    pipeline.stop().await.unwrap();
    let last = view.borrow().clone();
    assert_eq!(last.finalized, "Hello World");
    assert!(!last.recording);
}

#[tokio::test]
async fn test_volatile_segment_replaces_without_touching_finalized() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![
        TranscriptSegment::finalized("done "),
        TranscriptSegment::volatile("pen"),
        TranscriptSegment::volatile("pending"),
    ]));
    let (mut pipeline, _probe, _session, mut view) = modern_fixture(analyzer);

    pipeline.start("en").await.unwrap();
    wait_for_view(&mut view, |v| v.volatile == "pending").await;
    assert_eq!(view.borrow().finalized, "done ");

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_cleans_up_even_when_finalize_fails() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![]).failing_finalize());
    let (mut pipeline, probe, session, _view) = modern_fixture(analyzer);

    pipeline.start("en").await.unwrap();
    assert!(probe.is_tapped());
    assert!(session.is_active());

    let err = pipeline.stop().await.unwrap_err();
    assert!(matches!(err, SessionError::EngineUnavailable(_)));

    // Cleanup happened regardless of the drain failure.
    assert!(!probe.is_tapped());
    assert!(!session.is_active());
    assert_eq!(pipeline.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_unsupported_locale_fails_before_tap_install() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![]));
    let (mut pipeline, probe, session, view) = modern_fixture(analyzer);

    let err = pipeline.start("xx").await.unwrap_err();
    assert!(matches!(err, SessionError::LocaleUnsupported(_)));

    assert_eq!(probe.install_attempts(), 0);
    assert!(!session.is_active());
    assert!(!view.borrow().recording);
    assert_eq!(pipeline.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_missing_model_installs_then_records() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![]).not_installed());
    let (mut pipeline, probe, _session, _view) = modern_fixture(Arc::clone(&analyzer));

    pipeline.start("en").await.unwrap();
    assert_eq!(analyzer.install_calls(), 1);
    assert_eq!(pipeline.state(), SessionState::Recording);
    assert!(probe.is_tapped());

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_rejected_while_active() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![]));
    let (mut pipeline, _probe, _session, _view) = modern_fixture(analyzer);

    pipeline.start("en").await.unwrap();
    let err = pipeline.start("en").await.unwrap_err();
    assert!(matches!(err, SessionError::SessionActive));

    pipeline.stop().await.unwrap();
    assert!(pipeline.start("en").await.is_ok());
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_captured_buffers_reach_analyzer_converted() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![]));
    let (mut pipeline, probe, _session, _view) = modern_fixture(Arc::clone(&analyzer));

    pipeline.start("en").await.unwrap();
    assert!(probe.send(capture_buffer(2048)));
    assert!(probe.send(capture_buffer(2048)));
    pipeline.stop().await.unwrap();

    // 48kHz capture buffers arrive as 16kHz mono f32:
    // ceil(2048 * 16000 / 48000) = 683 frames each.
    let received = analyzer.received();
    assert_eq!(received.len(), 2);
    for (format, frames) in received {
        assert_eq!(format, AudioFormat::mono_f32(16000));
        assert_eq!(frames, 683);
    }
}

// --- legacy pipeline ---

#[derive(Default)]
struct RecognizerProbe {
    request_format: Mutex<Option<AudioFormat>>,
    appended: AtomicUsize,
    flushed_on_end: AtomicBool,
}

struct ScriptedRecognizer {
    probe: Arc<RecognizerProbe>,
}

impl ScriptedRecognizer {
    fn new() -> (Self, Arc<RecognizerProbe>) {
        let probe = Arc::new(RecognizerProbe::default());
        (
            Self {
                probe: Arc::clone(&probe),
            },
            probe,
        )
    }
}

impl LegacyRecognizer for ScriptedRecognizer {
    fn start_request(
        &self,
        format: AudioFormat,
        results: mpsc::UnboundedSender<TranscriptSegment>,
    ) -> Result<Box<dyn RecognitionRequest>, SessionError> {
        *self.probe.request_format.lock().unwrap() = Some(format);
        Ok(Box::new(ScriptedRequest {
            probe: Arc::clone(&self.probe),
            results,
            cancelled: false,
            ended: false,
        }))
    }
}

struct ScriptedRequest {
    probe: Arc<RecognizerProbe>,
    results: mpsc::UnboundedSender<TranscriptSegment>,
    cancelled: bool,
    ended: bool,
}

impl RecognitionRequest for ScriptedRequest {
    fn append(&mut self, _buffer: &AudioBuffer) -> Result<(), SessionError> {
        if self.cancelled || self.ended {
            return Ok(());
        }
        let n = self.probe.appended.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.results.send(TranscriptSegment::volatile(format!("partial {}", n)));
        if n % 2 == 0 {
            let _ = self.results.send(TranscriptSegment::finalized("chunk "));
        }
        Ok(())
    }

    fn end_audio(&mut self) {
        if self.cancelled || self.ended {
            return;
        }
        self.ended = true;
        self.probe.flushed_on_end.store(true, Ordering::SeqCst);
        let _ = self.results.send(TranscriptSegment::finalized("tail "));
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

fn legacy_fixture() -> (
    LegacyPipeline,
    Arc<CaptureProbe>,
    Arc<RecognizerProbe>,
    AudioSessionController,
    watch::Receiver<TranscriptView>,
) {
    let (capture, capture_probe) = ScriptedCapture::new(AudioFormat::mono_f32(48000));
    let (recognizer, recognizer_probe) = ScriptedRecognizer::new();
    let session = AudioSessionController::new();
    let (view_tx, view_rx) = watch::channel(TranscriptView::default());
    let pipeline = LegacyPipeline::new(
        Box::new(capture),
        Arc::new(recognizer),
        ScriptedPermissions::granted(),
        session.clone(),
        Arc::new(view_tx),
    );
    (pipeline, capture_probe, recognizer_probe, session, view_rx)
}

#[tokio::test]
async fn test_legacy_feeds_native_format_and_accumulates() {
    let (mut pipeline, capture_probe, recognizer_probe, session, mut view) = legacy_fixture();

    pipeline.start().await.unwrap();
    assert_eq!(
        *recognizer_probe.request_format.lock().unwrap(),
        Some(AudioFormat::mono_f32(48000))
    );

    assert!(capture_probe.send(capture_buffer(2048)));
    assert!(capture_probe.send(capture_buffer(2048)));
    wait_for_view(&mut view, |v| v.finalized == "chunk ").await;

    pipeline.stop().await.unwrap();
    assert!(!capture_probe.is_tapped());
    assert!(!session.is_active());
    assert_eq!(recognizer_probe.appended.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_legacy_stop_cancels_before_ending_audio() {
    let (mut pipeline, _capture_probe, recognizer_probe, _session, view) = legacy_fixture();

    pipeline.start().await.unwrap();
    pipeline.stop().await.unwrap();

    // The request was cancelled first, so ending audio was a no-op and the
    // trailing flush never fired.
    assert!(!recognizer_probe.flushed_on_end.load(Ordering::SeqCst));
    assert!(!view.borrow().finalized.contains("tail"));
}

#[tokio::test]
async fn test_one_session_across_both_pipelines() {
    let session = AudioSessionController::new();

    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![]));
    let (modern_capture, _modern_probe) = ScriptedCapture::new(AudioFormat::mono_f32(48000));
    let (modern_view_tx, _modern_view_rx) = watch::channel(TranscriptView::default());
    let mut modern = ModernPipeline::new(
        Box::new(modern_capture),
        analyzer,
        ScriptedPermissions::granted(),
        session.clone(),
        Arc::new(modern_view_tx),
    );

    let (legacy_capture, _legacy_probe) = ScriptedCapture::new(AudioFormat::mono_f32(48000));
    let (recognizer, _recognizer_probe) = ScriptedRecognizer::new();
    let (legacy_view_tx, _legacy_view_rx) = watch::channel(TranscriptView::default());
    let mut legacy = LegacyPipeline::new(
        Box::new(legacy_capture),
        Arc::new(recognizer),
        ScriptedPermissions::granted(),
        session.clone(),
        Arc::new(legacy_view_tx),
    );

    modern.start("en").await.unwrap();
    let err = legacy.start().await.unwrap_err();
    assert!(matches!(err, SessionError::AudioSession(_)));

    modern.stop().await.unwrap();
    legacy.start().await.unwrap();
    legacy.stop().await.unwrap();
}

#[tokio::test]
async fn test_denied_microphone_permission_aborts_start() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![]));
    let (capture, probe) = ScriptedCapture::new(AudioFormat::mono_f32(48000));
    let session = AudioSessionController::new();
    let (view_tx, view_rx) = watch::channel(TranscriptView::default());
    let permissions = Arc::new(ScriptedPermissions {
        microphone: PermissionStatus::Denied,
        recognition: PermissionStatus::Granted,
    });
    let mut pipeline = ModernPipeline::new(
        Box::new(capture),
        analyzer,
        permissions,
        session.clone(),
        Arc::new(view_tx),
    );

    let err = pipeline.start("en").await.unwrap_err();
    assert!(matches!(err, SessionError::MicrophonePermissionDenied));
    assert_eq!(probe.install_attempts(), 0);
    assert!(!session.is_active());
    assert!(!view_rx.borrow().recording);
}
