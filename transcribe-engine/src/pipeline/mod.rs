//! Recording pipeline managers.
//!
//! Both pipelines share the same shape: acquire permissions and the audio
//! session, install the microphone tap, move buffers toward an engine, and
//! serialize every transcript mutation onto a single result-consumption
//! task that publishes watch snapshots. They differ in what sits between
//! tap and transcript.

pub mod legacy;
pub mod modern;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::transcript::{Transcript, TranscriptSegment, TranscriptView};

pub use legacy::LegacyPipeline;
pub use modern::ModernPipeline;

/// Which pipeline a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Legacy,
    Modern,
}

impl PipelineKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "legacy" => Some(Self::Legacy),
            "modern" | "streaming" => Some(Self::Modern),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineKind::Legacy => write!(f, "legacy"),
            PipelineKind::Modern => write!(f, "modern"),
        }
    }
}

/// Lifecycle of one pipeline manager.
///
/// `start` is accepted only in `Idle`; everything else is rejected rather
/// than relying on caller discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Preparing,
    Recording,
    Finalizing,
}

/// Spawn the task that owns all transcript mutations for one session.
///
/// Segments from any thread funnel through the channel; this task applies
/// them in arrival order and publishes a snapshot per mutation. It ends
/// when every segment sender is gone.
pub(crate) fn spawn_result_consumer(
    mut segments: mpsc::UnboundedReceiver<TranscriptSegment>,
    view: Arc<watch::Sender<TranscriptView>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut transcript = Transcript::new();
        while let Some(segment) = segments.recv().await {
            transcript.apply(&segment);
            view.send_replace(transcript.view(true));
        }
    })
}

/// Publish the end-of-session snapshot: text preserved, recording off.
pub(crate) fn publish_stopped(view: &watch::Sender<TranscriptView>) {
    let mut last = view.borrow().clone();
    last.recording = false;
    view.send_replace(last);
}

/// Publish the fresh-session snapshot: accumulators empty, recording on.
pub(crate) fn publish_started(view: &watch::Sender<TranscriptView>) {
    view.send_replace(TranscriptView {
        recording: true,
        ..Default::default()
    });
}
