//! Microphone capture source.
//!
//! A single tap per source instance: installing the tap builds and starts a
//! cpal input stream in the device's native format and re-chunks the
//! callback data into fixed-size buffers. The audio callback hands samples
//! to a forwarding thread over a lock-free channel; the forwarder owns the
//! re-chunking and the async sender.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::format::{AudioBuffer, AudioFormat, SampleFormat};

/// Frames per buffer produced by the tap.
pub const CHUNK_FRAMES: usize = 2048;

/// Capacity of the callback-side hand-off channel.
const CALLBACK_QUEUE: usize = 100;

/// Information about an available audio input device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// Live audio capture behind a tap.
///
/// Not required to be Send: sources are managed on the thread that owns the
/// pipeline. cpal streams in particular are !Send on some platforms.
pub trait CaptureSource {
    /// The hardware's native format, fixed for the lifetime of the source.
    fn native_format(&self) -> AudioFormat;

    /// Install the tap and start the hardware. Buffers of [`CHUNK_FRAMES`]
    /// frames are sent through `tx` until the tap is removed. At most one
    /// tap may be active per source.
    fn install_tap(&mut self, tx: mpsc::UnboundedSender<AudioBuffer>) -> Result<(), SessionError>;

    /// Stop the hardware and remove the tap, closing the buffer channel.
    /// Idempotent.
    fn remove_tap(&mut self);

    fn is_tapped(&self) -> bool;
}

/// cpal-backed capture source.
pub struct CpalCapture {
    device: cpal::Device,
    native: AudioFormat,
    chunk_frames: usize,
    stream: Option<Stream>,
}

impl CpalCapture {
    /// Open the named device (or the system default) and query its native
    /// format. Fails when no usable input device exists.
    pub fn new(device_name: Option<&str>, chunk_frames: usize) -> Result<Self, SessionError> {
        let host = cpal::default_host();

        let device = match device_name {
            None | Some("default") => host
                .default_input_device()
                .ok_or_else(|| SessionError::CaptureStart("no input device available".to_string()))?,
            Some(name) => {
                let mut found = None;
                if let Ok(devices) = host.input_devices() {
                    for device in devices {
                        if device.name().map(|n| n == name).unwrap_or(false) {
                            found = Some(device);
                            break;
                        }
                    }
                }
                match found {
                    Some(device) => device,
                    None => {
                        warn!("input device '{}' not found, using default", name);
                        host.default_input_device().ok_or_else(|| {
                            SessionError::CaptureStart("no input device available".to_string())
                        })?
                    }
                }
            }
        };

        let default_config = device
            .default_input_config()
            .map_err(|e| SessionError::CaptureStart(e.to_string()))?;
        let native = AudioFormat::new(
            default_config.sample_rate().0,
            default_config.channels(),
            SampleFormat::F32,
        );

        info!(
            "input device '{}', native format {}",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            native
        );

        Ok(Self {
            device,
            native,
            chunk_frames,
            stream: None,
        })
    }
}

impl CaptureSource for CpalCapture {
    fn native_format(&self) -> AudioFormat {
        self.native
    }

    fn install_tap(&mut self, tx: mpsc::UnboundedSender<AudioBuffer>) -> Result<(), SessionError> {
        if self.stream.is_some() {
            return Err(SessionError::CaptureStart(
                "a tap is already installed on this source".to_string(),
            ));
        }

        let config = StreamConfig {
            channels: self.native.channels,
            sample_rate: SampleRate(self.native.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (raw_tx, raw_rx) = crossbeam_channel::bounded::<Vec<f32>>(CALLBACK_QUEUE);

        let stream = self
            .device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = raw_tx.try_send(data.to_vec());
                },
                |err| error!("audio stream error: {}", err),
                None,
            )
            .map_err(|e| SessionError::CaptureStart(e.to_string()))?;

        // Forwarder thread re-chunks callback data into fixed-size buffers
        // and exits when the stream (sender) or the consumer goes away.
        let native = self.native;
        let chunk_samples = self.chunk_frames * self.native.channels.max(1) as usize;
        std::thread::spawn(move || {
            let mut pending: Vec<f32> = Vec::with_capacity(chunk_samples * 2);
            while let Ok(data) = raw_rx.recv() {
                pending.extend_from_slice(&data);
                while pending.len() >= chunk_samples {
                    let chunk: Vec<f32> = pending.drain(..chunk_samples).collect();
                    if tx.send(AudioBuffer::from_f32(native, chunk)).is_err() {
                        return;
                    }
                }
            }
        });

        stream
            .play()
            .map_err(|e| SessionError::CaptureStart(e.to_string()))?;
        self.stream = Some(stream);

        info!("microphone tap installed ({} frames per buffer)", self.chunk_frames);
        Ok(())
    }

    fn remove_tap(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            debug!("microphone tap removed");
        }
    }

    fn is_tapped(&self) -> bool {
        self.stream.is_some()
    }
}

/// List available input devices.
pub fn list_devices() -> anyhow::Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let is_default = default_name.as_ref() == Some(&name);
                devices.push(DeviceInfo { name, is_default });
            }
        }
    }

    Ok(devices)
}
