//! Debug audio preservation.
//!
//! When enabled, the exact sample stream fed to the streaming analyzer is
//! mirrored to a WAV file with a metadata sidecar, so recognition problems
//! can be replayed offline. Bounded rotation keeps the directory small.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::format::{AudioBuffer, AudioFormat};

/// Maximum number of debug recordings to keep per directory.
const MAX_DEBUG_FILES: usize = 50;

/// Metadata written next to each debug recording.
#[derive(Debug, Serialize)]
pub struct SessionMetadata {
    pub timestamp: DateTime<Utc>,
    pub pipeline: String,
    pub sample_rate: u32,
    pub duration_ms: u64,
    pub buffers_fed: u64,
    pub buffers_dropped: u64,
    pub conversion_failures: u64,
}

/// Check if debug audio is enabled via config or environment.
pub fn is_enabled(config_flag: bool) -> bool {
    if config_flag {
        return true;
    }
    std::env::var("SPEECH_COMPARE_DEBUG_AUDIO")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// One session's debug recording.
pub struct DebugAudioSink {
    writer: WavWriter<std::io::BufWriter<fs::File>>,
    wav_path: PathBuf,
    sample_rate: u32,
    samples_written: u64,
    started: DateTime<Utc>,
}

impl DebugAudioSink {
    pub fn create(dir: &Path, format: &AudioFormat) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let started = Utc::now();
        let wav_path = dir.join(format!(
            "capture-{}.wav",
            started.format("%Y%m%d-%H%M%S%.3f")
        ));

        let spec = WavSpec {
            channels: 1,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&wav_path, spec)?;

        debug!("debug audio recording to {}", wav_path.display());
        Ok(Self {
            writer,
            wav_path,
            sample_rate: format.sample_rate,
            samples_written: 0,
            started,
        })
    }

    /// Mirror one buffer into the recording.
    pub fn write(&mut self, buffer: &AudioBuffer) -> Result<()> {
        for sample in buffer.mono_i16() {
            self.writer.write_sample(sample)?;
            self.samples_written += 1;
        }
        Ok(())
    }

    /// Close the recording and write its metadata sidecar.
    pub fn finalize(
        self,
        pipeline: &str,
        buffers_fed: u64,
        buffers_dropped: u64,
        conversion_failures: u64,
    ) -> Result<()> {
        let duration_ms = self.samples_written * 1000 / self.sample_rate.max(1) as u64;
        let metadata = SessionMetadata {
            timestamp: self.started,
            pipeline: pipeline.to_string(),
            sample_rate: self.sample_rate,
            duration_ms,
            buffers_fed,
            buffers_dropped,
            conversion_failures,
        };

        let wav_path = self.wav_path.clone();
        self.writer.finalize()?;

        let meta_path = wav_path.with_extension("json");
        fs::write(&meta_path, serde_json::to_string_pretty(&metadata)?)?;

        info!(
            "debug audio saved: {} ({:.1}s)",
            wav_path.display(),
            duration_ms as f64 / 1000.0
        );

        if let Some(dir) = wav_path.parent() {
            prune_old(dir);
        }
        Ok(())
    }
}

/// Delete the oldest recordings beyond the rotation limit.
fn prune_old(dir: &Path) {
    let mut recordings: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "wav").unwrap_or(false))
            .collect(),
        Err(e) => {
            warn!("failed to scan debug dir {}: {}", dir.display(), e);
            return;
        }
    };

    if recordings.len() <= MAX_DEBUG_FILES {
        return;
    }

    recordings.sort();
    let excess = recordings.len() - MAX_DEBUG_FILES;
    for path in recordings.into_iter().take(excess) {
        let _ = fs::remove_file(path.with_extension("json"));
        if let Err(e) = fs::remove_file(&path) {
            warn!("failed to prune {}: {}", path.display(), e);
        }
    }
}
