//! Microphone capture sessions via cpal.
//!
//! A capture session owns the input device for its whole lifetime: opened
//! on `start()`, buffering resampled 16 kHz mono samples into the ring
//! buffer, released on `stop()` before the buffered audio is drained into
//! the finalized payload. cpal streams are not `Send`, so the stream lives
//! on a dedicated worker thread and `start`/`stop` talk to it over a
//! command channel with oneshot replies.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::ring_buffer::{sample_ring_buffer, SampleConsumer};

/// Sample rate of every finalized payload.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// One finalized utterance: 16 kHz mono f32 samples.
#[derive(Debug, Clone)]
pub struct RecordedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl RecordedAudio {
    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Why the microphone could not be acquired.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone access denied")]
    PermissionDenied,
    #[error("no usable input device: {0}")]
    DeviceUnavailable(String),
}

/// Seam between the controller and the platform capture device.
///
/// `start` acquires the microphone and begins buffering; `stop` releases
/// the device and yields the accumulated payload. `stop` with no active
/// session returns `Ok(None)`; calling it twice is harmless.
#[async_trait]
pub trait CaptureDevice: Send {
    async fn start(&mut self) -> Result<(), CaptureError>;
    async fn stop(&mut self) -> Result<Option<RecordedAudio>, CaptureError>;
}

enum CaptureCmd {
    Start {
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
    Stop {
        reply: oneshot::Sender<Option<RecordedAudio>>,
    },
}

/// Production capture device backed by cpal.
pub struct MicCapture {
    cmd_tx: std::sync::mpsc::Sender<CaptureCmd>,
}

impl MicCapture {
    /// Spawn the capture worker. `device_name` of `None` uses the system
    /// default input.
    pub fn new(device_name: Option<String>) -> Self {
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || capture_worker(cmd_rx, device_name));
        Self { cmd_tx }
    }

    fn worker_gone() -> CaptureError {
        CaptureError::DeviceUnavailable("capture worker is gone".into())
    }
}

#[async_trait]
impl CaptureDevice for MicCapture {
    async fn start(&mut self) -> Result<(), CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(CaptureCmd::Start { reply })
            .map_err(|_| Self::worker_gone())?;
        rx.await.map_err(|_| Self::worker_gone())?
    }

    async fn stop(&mut self) -> Result<Option<RecordedAudio>, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(CaptureCmd::Stop { reply })
            .map_err(|_| Self::worker_gone())?;
        rx.await.map_err(|_| Self::worker_gone())
    }
}

/// Worker loop owning the cpal stream. At most one session is active at a
/// time; a second start while active is acknowledged without side effect.
fn capture_worker(cmd_rx: std::sync::mpsc::Receiver<CaptureCmd>, device_name: Option<String>) {
    let mut session: Option<(Stream, SampleConsumer)> = None;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            CaptureCmd::Start { reply } => {
                let result = if session.is_some() {
                    debug!("capture session already active, start ignored");
                    Ok(())
                } else {
                    match open_stream(device_name.as_deref()) {
                        Ok(opened) => {
                            session = Some(opened);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                };
                let _ = reply.send(result);
            }
            CaptureCmd::Stop { reply } => {
                let payload = session.take().map(|(stream, mut consumer)| {
                    // Release the device before draining so it is free for
                    // other consumers no matter what happens downstream.
                    drop(stream);
                    let samples = consumer.drain_all();
                    debug!(samples = samples.len(), "capture session finalized");
                    RecordedAudio {
                        samples,
                        sample_rate: CAPTURE_SAMPLE_RATE,
                    }
                });
                let _ = reply.send(payload);
            }
        }
    }
    debug!("capture worker exiting");
}

struct InputConfig {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
}

fn resolve_device(device_name: Option<&str>) -> Result<InputConfig, CaptureError> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| classify(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| {
                CaptureError::DeviceUnavailable(format!("input device not found: {name}"))
            })?
    } else {
        host.default_input_device().ok_or_else(|| {
            CaptureError::DeviceUnavailable("no default input device".to_string())
        })?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());

    let default_config = device
        .default_input_config()
        .map_err(|e| classify(e.to_string()))?;
    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    info!(
        device = %dev_name,
        native_rate,
        channels,
        "input device selected (resampling to {} Hz mono if needed)",
        CAPTURE_SAMPLE_RATE,
    );

    Ok(InputConfig {
        device,
        stream_config: StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(native_rate),
            buffer_size: cpal::BufferSize::Default,
        },
        native_rate,
    })
}

/// Open the input stream and start buffering into a fresh ring buffer.
fn open_stream(device_name: Option<&str>) -> Result<(Stream, SampleConsumer), CaptureError> {
    let cfg = resolve_device(device_name)?;
    let native_rate = cfg.native_rate;
    let channels = cfg.stream_config.channels;
    let (mut producer, consumer) = sample_ring_buffer(None);

    let stream = cfg
        .device
        .build_input_stream(
            &cfg.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if channels > 1 {
                    to_mono(data, channels)
                } else {
                    data.to_vec()
                };
                let resampled = if native_rate != CAPTURE_SAMPLE_RATE {
                    resample_linear(&mono, native_rate, CAPTURE_SAMPLE_RATE)
                } else {
                    mono
                };
                // A full buffer drops the newest audio; an utterance that
                // long is cut off rather than blocking the callback.
                producer.push_slice(&resampled);
            },
            move |err| {
                error!("input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable("input device disappeared".into())
            }
            other => classify(other.to_string()),
        })?;

    stream.play().map_err(|e| classify(e.to_string()))?;
    info!("microphone capture started");

    Ok((stream, consumer))
}

/// cpal reports permission failures as backend-specific errors; sort them
/// out of the generic device-unavailable bucket by message.
fn classify(message: String) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") {
        CaptureError::PermissionDenied
    } else {
        CaptureError::DeviceUnavailable(message)
    }
}

/// Down-mix multi-channel audio to mono by averaging channels.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear resampler, mono f32.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}
