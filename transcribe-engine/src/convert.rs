//! Buffer format adapter.
//!
//! Converts captured PCM buffers into the layout a transcription engine
//! requires: channel downmix, sample-rate conversion via rubato, and sample
//! representation encoding. The conversion state is cached per
//! (source, target) format pair and rebuilt whenever either side changes.
//!
//! The resampler path favors exact sample-count alignment with the source
//! stream over first-sample fidelity: output length is forced to
//! `ceil(input_frames * target_rate / source_rate)` and no priming or delay
//! compensation is applied. Offline high-quality resampling wants the
//! opposite tradeoff; this adapter is for live streaming.

use rubato::{FftFixedIn, Resampler};
use tracing::debug;

use crate::error::SessionError;
use crate::format::{AudioBuffer, AudioFormat, SampleFormat};

/// Fixed input chunk size fed to the resampler.
const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Result of pulling input from a [`OnceSupplier`].
#[derive(Debug, PartialEq)]
pub enum SupplierPull<'a> {
    /// The full source buffer, handed out on the first pull only.
    Data(&'a [f32]),
    /// Nothing more right now; not an end-of-stream signal.
    NoData,
}

/// Single-shot input supplier for one conversion call.
///
/// The conversion loop may pull more than once per output buffer; only the
/// first pull yields data, every later pull reports [`SupplierPull::NoData`]
/// without error.
pub struct OnceSupplier<'a> {
    remaining: Option<&'a [f32]>,
}

impl<'a> OnceSupplier<'a> {
    pub fn new(samples: &'a [f32]) -> Self {
        Self {
            remaining: Some(samples),
        }
    }

    pub fn pull(&mut self) -> SupplierPull<'a> {
        match self.remaining.take() {
            Some(data) => SupplierPull::Data(data),
            None => SupplierPull::NoData,
        }
    }
}

struct ConversionState {
    source: AudioFormat,
    target: AudioFormat,
    /// Absent when only layout/representation differ (equal sample rates).
    resampler: Option<FftFixedIn<f32>>,
}

impl ConversionState {
    fn build(source: AudioFormat, target: AudioFormat) -> Result<Self, SessionError> {
        if target.channels != 1 {
            return Err(SessionError::ConverterConstruction(format!(
                "unsupported target layout {target}: only mono targets are handled"
            )));
        }

        let resampler = if source.sample_rate != target.sample_rate {
            Some(
                FftFixedIn::<f32>::new(
                    source.sample_rate as usize,
                    target.sample_rate as usize,
                    RESAMPLER_CHUNK_SIZE,
                    1,
                    1,
                )
                .map_err(|e| SessionError::ConverterConstruction(e.to_string()))?,
            )
        } else {
            None
        };

        debug!("conversion state built: {source} -> {target}");
        Ok(Self {
            source,
            target,
            resampler,
        })
    }
}

/// Adapter converting audio buffers between formats.
///
/// Owned exclusively by one feeding task; the cached conversion state is
/// never shared.
pub struct BufferConverter {
    cached: Option<ConversionState>,
}

impl BufferConverter {
    pub fn new() -> Self {
        Self { cached: None }
    }

    /// Convert `buffer` to `target`.
    ///
    /// If the buffer already has the target format it is returned unchanged
    /// without allocating. Otherwise the cached conversion state for this
    /// (source, target) pair is used, rebuilding it first if the pair
    /// changed since the last call.
    pub fn convert(
        &mut self,
        buffer: AudioBuffer,
        target: &AudioFormat,
    ) -> Result<AudioBuffer, SessionError> {
        let source = buffer.format();
        if source == *target {
            return Ok(buffer);
        }

        let rebuild = match &self.cached {
            Some(state) => state.source != source || state.target != *target,
            None => true,
        };
        if rebuild {
            self.cached = Some(ConversionState::build(source, *target)?);
        }
        let state = self.cached.as_mut().unwrap();

        let expected = output_frames(buffer.frames(), source.sample_rate, target.sample_rate)?;

        let mono = buffer.mono_f32();
        let mut produced = match &mut state.resampler {
            Some(resampler) => resample(resampler, &mono, expected)?,
            None => mono,
        };
        // Trim the resampler's overshoot, or zero-fill its startup delay, so
        // the output stays sample-count aligned with the source stream.
        produced.resize(expected, 0.0);

        Ok(match target.sample_format {
            SampleFormat::F32 => AudioBuffer::from_f32(*target, produced),
            SampleFormat::I16 => {
                let encoded = produced
                    .iter()
                    .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
                    .collect();
                AudioBuffer::from_i16(*target, encoded)
            }
        })
    }

    #[cfg(test)]
    fn cached_pair(&self) -> Option<(AudioFormat, AudioFormat)> {
        self.cached.as_ref().map(|s| (s.source, s.target))
    }
}

impl Default for BufferConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// Target frame count for one conversion call.
fn output_frames(input_frames: usize, source_rate: u32, target_rate: u32) -> Result<usize, SessionError> {
    let scaled = (input_frames as u64)
        .checked_mul(target_rate as u64)
        .ok_or(SessionError::ConversionCapacity {
            frames: input_frames as u64,
        })?;
    let frames = scaled.div_ceil(source_rate as u64);
    usize::try_from(frames).map_err(|_| SessionError::ConversionCapacity { frames })
}

fn resample(
    resampler: &mut FftFixedIn<f32>,
    mono: &[f32],
    expected: usize,
) -> Result<Vec<f32>, SessionError> {
    let mut produced = Vec::with_capacity(expected + RESAMPLER_CHUNK_SIZE);
    let mut supplier = OnceSupplier::new(mono);

    loop {
        let data = match supplier.pull() {
            SupplierPull::Data(data) => data,
            SupplierPull::NoData => break,
        };

        for chunk in data.chunks(RESAMPLER_CHUNK_SIZE) {
            let out = if chunk.len() == RESAMPLER_CHUNK_SIZE {
                resampler.process(&[chunk], None)
            } else {
                let mut padded = chunk.to_vec();
                padded.resize(RESAMPLER_CHUNK_SIZE, 0.0);
                resampler.process(&[&padded[..]], None)
            }
            .map_err(|e| SessionError::ConversionFailed(e.to_string()))?;
            produced.extend_from_slice(&out[0]);
        }
    }

    Ok(produced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_buffer(rate: u32, channels: u16, frames: usize) -> AudioBuffer {
        let format = AudioFormat::new(rate, channels, SampleFormat::F32);
        let samples: Vec<f32> = (0..frames * channels as usize)
            .map(|i| ((i % 100) as f32 - 50.0) / 100.0)
            .collect();
        AudioBuffer::from_f32(format, samples)
    }

    #[test]
    fn test_equal_formats_return_same_buffer() {
        let format = AudioFormat::mono_f32(16000);
        let buffer = f32_buffer(16000, 1, 2048);
        let ptr = buffer.samples_f32().unwrap().as_ptr();

        let mut converter = BufferConverter::new();
        let out = converter.convert(buffer, &format).unwrap();

        assert_eq!(out.samples_f32().unwrap().as_ptr(), ptr);
        assert!(converter.cached_pair().is_none());
    }

    #[test]
    fn test_output_frames_is_ceiling_of_ratio() {
        // 2048 * 16000 / 48000 = 682.67 -> 683
        assert_eq!(output_frames(2048, 48000, 16000).unwrap(), 683);
        // 2048 * 16000 / 44100 = 743.04 -> 744
        assert_eq!(output_frames(2048, 44100, 16000).unwrap(), 744);
        // Exact ratios stay exact.
        assert_eq!(output_frames(2048, 32000, 16000).unwrap(), 1024);
        assert_eq!(output_frames(0, 48000, 16000).unwrap(), 0);
    }

    #[test]
    fn test_resampled_length_matches_ceiling() {
        let target = AudioFormat::mono_f32(16000);
        let mut converter = BufferConverter::new();

        let out = converter.convert(f32_buffer(48000, 1, 2048), &target).unwrap();
        assert_eq!(out.frames(), 683);
        assert_eq!(out.format(), target);

        let out = converter.convert(f32_buffer(44100, 1, 2048), &target).unwrap();
        assert_eq!(out.frames(), 744);
    }

    #[test]
    fn test_equal_rate_downmix_keeps_frame_count() {
        let target = AudioFormat::mono_f32(48000);
        let mut converter = BufferConverter::new();

        let out = converter.convert(f32_buffer(48000, 2, 2048), &target).unwrap();
        assert_eq!(out.frames(), 2048);
    }

    #[test]
    fn test_i16_target_encodes_samples() {
        let target = AudioFormat::new(16000, 1, SampleFormat::I16);
        let mut converter = BufferConverter::new();

        let out = converter.convert(f32_buffer(16000, 2, 512), &target).unwrap();
        assert_eq!(out.frames(), 512);
        assert!(out.samples_i16().is_some());
    }

    #[test]
    fn test_cache_rekeys_on_source_change() {
        let target = AudioFormat::mono_f32(16000);
        let mut converter = BufferConverter::new();

        converter.convert(f32_buffer(48000, 1, 1024), &target).unwrap();
        let first = converter.cached_pair().unwrap();
        assert_eq!(first.0.sample_rate, 48000);

        // A device change mid-session alters the source rate; the cached
        // state must not be reused.
        converter.convert(f32_buffer(44100, 1, 1024), &target).unwrap();
        let second = converter.cached_pair().unwrap();
        assert_eq!(second.0.sample_rate, 44100);
        assert_eq!(second.1, target);
    }

    #[test]
    fn test_stereo_upmix_target_rejected() {
        let target = AudioFormat::new(16000, 2, SampleFormat::F32);
        let mut converter = BufferConverter::new();

        let err = converter
            .convert(f32_buffer(48000, 1, 1024), &target)
            .unwrap_err();
        assert!(matches!(err, SessionError::ConverterConstruction(_)));
    }

    #[test]
    fn test_supplier_yields_exactly_once() {
        let samples = vec![0.0f32; 16];
        let mut supplier = OnceSupplier::new(&samples);

        match supplier.pull() {
            SupplierPull::Data(data) => assert_eq!(data.len(), 16),
            SupplierPull::NoData => panic!("first pull must yield the buffer"),
        }
        assert_eq!(supplier.pull(), SupplierPull::NoData);
        assert_eq!(supplier.pull(), SupplierPull::NoData);
    }
}
