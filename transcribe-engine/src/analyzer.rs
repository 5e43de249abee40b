//! Streaming transcription analyzer.
//!
//! The analyzer consumes converted audio from the input channel at its own
//! pace and emits a stream of segments: volatile previews for the window
//! still being decoded, finalized text when a window is committed. Closing
//! the producer side of the channel signals end of input; the handle's
//! `finish` only returns after everything buffered has been processed and
//! the final results emitted.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::InputReceiver;
use crate::error::SessionError;
use crate::format::AudioFormat;
use crate::transcript::TranscriptSegment;

/// Streaming transcription engine contract.
pub trait StreamingAnalyzer: Send + Sync {
    /// The input format the analyzer wants buffers converted to.
    fn preferred_format(&self) -> AudioFormat;

    /// Locales the analyzer can transcribe.
    fn supported_locales(&self) -> Vec<String>;

    /// Whether the locale's model assets are installed.
    fn is_installed(&self, locale: &str) -> bool;

    /// Download and install the locale's model assets. Blocking.
    fn install(&self, locale: &str) -> Result<(), SessionError>;

    /// Begin analyzing: consume buffers from `input`, publish segments to
    /// `results`. Runs until the input channel closes and all buffered
    /// audio is processed.
    fn start(
        &self,
        locale: &str,
        input: InputReceiver,
        results: mpsc::UnboundedSender<TranscriptSegment>,
    ) -> Result<AnalyzerHandle, SessionError>;
}

/// Handle to a running analysis.
pub struct AnalyzerHandle {
    task: JoinHandle<Result<(), SessionError>>,
}

impl AnalyzerHandle {
    /// Wrap an analysis task. The task must return once its input channel
    /// closes and every remaining result has been emitted.
    pub fn from_task(task: JoinHandle<Result<(), SessionError>>) -> Self {
        Self { task }
    }

    /// Finalize and drain: resolves only after all buffered input has been
    /// fully processed and final results emitted. Callers close the
    /// producer end of the input channel first.
    pub async fn finish(self) -> Result<(), SessionError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::EngineUnavailable(format!(
                "analysis task failed: {}",
                e
            ))),
        }
    }
}

mod whisper_impl {
    use std::path::PathBuf;
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use tracing::{debug, info};
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    use super::{AnalyzerHandle, StreamingAnalyzer};
    use crate::channel::InputReceiver;
    use crate::error::SessionError;
    use crate::format::AudioFormat;
    use crate::model_manager;
    use crate::transcript::TranscriptSegment;

    /// Whisper wants 16kHz mono f32.
    const ANALYZER_SAMPLE_RATE: u32 = 16000;

    /// Minimum audio before a preview pass is worth running (0.15s).
    const MIN_WINDOW_SAMPLES: usize = 2400;

    /// New audio required between preview passes (0.3s). Balances preview
    /// latency against decode cost.
    const RETRANSCRIBE_THRESHOLD: usize = 4800;

    /// Window size at which a segment is committed (30s context limit).
    const MAX_WINDOW_SAMPLES: usize = 30 * ANALYZER_SAMPLE_RATE as usize;

    /// Whisper-backed streaming analyzer.
    pub struct WhisperAnalyzer {
        model_dir: PathBuf,
    }

    impl WhisperAnalyzer {
        pub fn new(model_dir: impl Into<PathBuf>) -> Self {
            Self {
                model_dir: model_dir.into(),
            }
        }
    }

    impl StreamingAnalyzer for WhisperAnalyzer {
        fn preferred_format(&self) -> AudioFormat {
            AudioFormat::mono_f32(ANALYZER_SAMPLE_RATE)
        }

        fn supported_locales(&self) -> Vec<String> {
            model_manager::supported_locales()
                .into_iter()
                .map(str::to_string)
                .collect()
        }

        fn is_installed(&self, locale: &str) -> bool {
            model_manager::model_installed(locale, &self.model_dir)
        }

        fn install(&self, locale: &str) -> Result<(), SessionError> {
            model_manager::ensure_model(locale, &self.model_dir).map(|_| ())
        }

        fn start(
            &self,
            locale: &str,
            input: InputReceiver,
            results: mpsc::UnboundedSender<TranscriptSegment>,
        ) -> Result<AnalyzerHandle, SessionError> {
            let model_path = model_manager::model_path(locale, &self.model_dir)
                .ok_or_else(|| SessionError::LocaleUnsupported(locale.to_string()))?;

            info!("loading whisper model from {}", model_path.display());
            let context = WhisperContext::new_with_params(
                &model_path.to_string_lossy(),
                WhisperContextParameters::default(),
            )
            .map_err(|e| {
                SessionError::EngineUnavailable(format!("failed to load whisper model: {:?}", e))
            })?;

            let language = model_manager::model_for(locale)
                .map(|m| m.locale.to_string())
                .unwrap_or_else(|| locale.to_string());

            let task = tokio::task::spawn_blocking(move || {
                run_analysis(Arc::new(context), language, input, results)
            });
            Ok(AnalyzerHandle::from_task(task))
        }
    }

    /// Blocking intake loop: pull buffers, keep a rolling window, preview
    /// it periodically, commit it on the context limit and at end of input.
    fn run_analysis(
        context: Arc<WhisperContext>,
        language: String,
        mut input: InputReceiver,
        results: mpsc::UnboundedSender<TranscriptSegment>,
    ) -> Result<(), SessionError> {
        let mut window: Vec<f32> = Vec::new();
        let mut since_preview = 0usize;

        while let Some(buffer) = input.blocking_recv() {
            let samples = buffer.mono_f32();
            since_preview += samples.len();
            window.extend_from_slice(&samples);

            if window.len() >= MAX_WINDOW_SAMPLES {
                let text = transcribe(&context, &window, &language)?;
                if !text.is_empty() {
                    let _ = results.send(TranscriptSegment::finalized(format!("{} ", text)));
                }
                window.clear();
                since_preview = 0;
                continue;
            }

            if since_preview >= RETRANSCRIBE_THRESHOLD && window.len() >= MIN_WINDOW_SAMPLES {
                since_preview = 0;
                let text = transcribe(&context, &window, &language)?;
                if !text.is_empty() {
                    let _ = results.send(TranscriptSegment::volatile(text));
                }
            }
        }

        // End of input: commit whatever remains.
        if window.len() >= MIN_WINDOW_SAMPLES {
            let text = transcribe(&context, &window, &language)?;
            if !text.is_empty() {
                let _ = results.send(TranscriptSegment::finalized(text));
            }
        }

        debug!("analysis drained to end of input");
        Ok(())
    }

    fn transcribe(
        context: &WhisperContext,
        samples: &[f32],
        language: &str,
    ) -> Result<String, SessionError> {
        let mut state = context.create_state().map_err(|e| {
            SessionError::EngineUnavailable(format!("failed to create decode state: {:?}", e))
        })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_translate(false);
        params.set_no_context(true);
        params.set_single_segment(false);

        debug!(
            "decoding {:.2}s window",
            samples.len() as f32 / ANALYZER_SAMPLE_RATE as f32
        );

        state.full(params, samples).map_err(|e| {
            SessionError::EngineUnavailable(format!("transcription failed: {:?}", e))
        })?;

        let segments: Vec<String> = state
            .as_iter()
            .filter_map(|segment| {
                segment
                    .to_str_lossy()
                    .ok()
                    .map(|text| text.trim().to_string())
            })
            .filter(|text| !text.is_empty())
            .collect();

        Ok(segments.join(" "))
    }
}

pub use whisper_impl::WhisperAnalyzer;
