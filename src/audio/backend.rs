use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DeviceError;

/// Frames buffered per consumer before the source applies backpressure.
const TAP_BUFFER_FRAMES: usize = 256;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Fold interleaved stereo into mono by summing channels.
    pub fn to_mono(self) -> AudioFrame {
        if self.channels != 2 {
            return self;
        }

        let samples = self
            .samples
            .chunks_exact(2)
            .map(|pair| {
                let sum = pair[0] as i32 + pair[1] as i32;
                sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16
            })
            .collect();

        AudioFrame {
            samples,
            channels: 1,
            ..self
        }
    }

    /// Downsample by integer decimation. Upsampling is not supported; the
    /// frame is returned unchanged.
    pub fn downsample(self, target_rate: u32) -> AudioFrame {
        if target_rate == 0 || self.sample_rate <= target_rate {
            return self;
        }

        let ratio = self.sample_rate / target_rate;
        if ratio <= 1 {
            return self;
        }

        let channels = self.channels.max(1) as usize;
        let samples = self
            .samples
            .chunks_exact(channels)
            .step_by(ratio as usize)
            .flatten()
            .copied()
            .collect();

        AudioFrame {
            samples,
            sample_rate: self.sample_rate / ratio,
            ..self
        }
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will decimate if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // 16kHz for Whisper
            target_channels: 1,        // Mono
            buffer_duration_ms: 100,   // 100ms buffers
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - File: decode an audio file and replay it (for batch processing and demos)
/// - Channel: frames pushed by the embedding application or by tests
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. Fails with
    /// [`DeviceError`] when the device is missing or access was refused.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<(), DeviceError>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio input selection
#[derive(Debug, Clone)]
pub enum AudioInput {
    /// Replay a file; `realtime` paces frames at their natural rate.
    File { path: PathBuf, realtime: bool },
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend for the requested input
    pub fn create(input: AudioInput, config: AudioBackendConfig) -> Box<dyn AudioBackend> {
        match input {
            AudioInput::File { path, realtime } => {
                Box::new(super::file::FileBackend::new(path, config, realtime))
            }
        }
    }
}

/// Backend fed through an mpsc sender held by the caller.
///
/// Stopping the backend closes the frame stream even if the feeder keeps
/// its sender alive.
pub struct ChannelBackend {
    feed: Option<mpsc::Receiver<AudioFrame>>,
    failure: Option<String>,
    relay: Option<JoinHandle<()>>,
}

impl ChannelBackend {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<AudioFrame>) {
        let (tx, rx) = mpsc::channel(buffer);
        let backend = Self {
            feed: Some(rx),
            failure: None,
            relay: None,
        };
        (backend, tx)
    }

    /// A backend whose device can never be opened.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            feed: None,
            failure: Some(reason.into()),
            relay: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for ChannelBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        if let Some(reason) = &self.failure {
            return Err(DeviceError::Unavailable(reason.clone()));
        }

        let mut feed = self.feed.take().ok_or(DeviceError::AlreadyStarted)?;
        let (tx, rx) = mpsc::channel(TAP_BUFFER_FRAMES);

        self.relay = Some(tokio::spawn(async move {
            while let Some(frame) = feed.recv().await {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.relay.as_ref().is_some_and(|r| !r.is_finished())
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// A started backend whose frames can be read by several independent
/// consumers at once.
///
/// Frames are parked in the backend channel until [`AudioSource::resume`]
/// is called, so taps created before resuming see the stream from its
/// first frame.
pub struct AudioSource {
    backend: tokio::sync::Mutex<Box<dyn AudioBackend>>,
    parked: Mutex<Option<mpsc::Receiver<AudioFrame>>>,
    taps: Arc<Mutex<Vec<mpsc::Sender<AudioFrame>>>>,
    drained: watch::Receiver<bool>,
    drained_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl AudioSource {
    /// Acquire the device. Nothing flows until [`resume`](Self::resume).
    pub async fn open(mut backend: Box<dyn AudioBackend>) -> Result<Self, DeviceError> {
        info!("Opening audio source: {}", backend.name());
        let rx = backend.start().await?;
        let (drained_tx, drained) = watch::channel(false);

        Ok(Self {
            backend: tokio::sync::Mutex::new(backend),
            parked: Mutex::new(Some(rx)),
            taps: Arc::new(Mutex::new(Vec::new())),
            drained,
            drained_tx: Mutex::new(Some(drained_tx)),
        })
    }

    /// Register a new consumer. It receives every frame delivered after
    /// this call.
    pub fn tap(&self) -> FrameTap {
        let (tx, rx) = mpsc::channel(TAP_BUFFER_FRAMES);
        if let Ok(mut taps) = self.taps.lock() {
            taps.push(tx);
        }
        FrameTap { rx, pending: None }
    }

    /// True once the backend stream has ended.
    pub fn is_drained(&self) -> bool {
        *self.drained.borrow()
    }

    /// Start fanning frames out to the registered taps. Idempotent.
    pub fn resume(&self) {
        let parked = self.parked.lock().ok().and_then(|mut p| p.take());
        let Some(mut rx) = parked else {
            return;
        };
        let drained_tx = self.drained_tx.lock().ok().and_then(|mut d| d.take());
        let taps = Arc::clone(&self.taps);

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let targets = match taps.lock() {
                    Ok(mut taps) => {
                        taps.retain(|t| !t.is_closed());
                        taps.clone()
                    }
                    Err(_) => break,
                };

                for target in targets {
                    // A closed tap just stopped listening.
                    let _ = target.send(frame.clone()).await;
                }
            }

            if let Ok(mut taps) = taps.lock() {
                taps.clear();
            }
            if let Some(tx) = drained_tx {
                let _ = tx.send(true);
            }
            debug!("Audio source drained");
        });
    }

    /// Resolves once the backend stream has ended.
    pub async fn finished(&self) {
        let mut drained = self.drained.clone();
        let _ = drained.wait_for(|d| *d).await;
    }

    /// Stop the backend. Consumers see end-of-stream once buffered frames
    /// are delivered.
    pub async fn close(&self) {
        let mut backend = self.backend.lock().await;
        if let Err(e) = backend.stop().await {
            warn!("Failed to stop audio backend {}: {}", backend.name(), e);
        }
        if let Ok(mut taps) = self.taps.lock() {
            taps.clear();
        }
    }
}

/// One consumer's view of an [`AudioSource`].
pub struct FrameTap {
    rx: mpsc::Receiver<AudioFrame>,
    pending: Option<AudioFrame>,
}

impl FrameTap {
    /// Next frame, or `None` once the source is closed.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        if let Some(frame) = self.pending.take() {
            return Some(frame);
        }
        self.rx.recv().await
    }

    /// Next frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<AudioFrame> {
        self.pending.take().or_else(|| self.rx.try_recv().ok())
    }

    /// Hand a frame back so the next reader of this tap sees it first.
    pub(crate) fn push_back(&mut self, frame: AudioFrame) {
        debug_assert!(self.pending.is_none());
        self.pending = Some(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<i16>, sample_rate: u32, channels: u16) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn stereo_folds_to_mono_with_clipping() {
        let mono = frame(vec![100, 200, i16::MAX, 10], 16000, 2).to_mono();
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples, vec![300, i16::MAX]);
    }

    #[test]
    fn decimation_reports_actual_rate() {
        let out = frame((0..12).collect(), 48000, 1).downsample(16000);
        assert_eq!(out.sample_rate, 16000);
        assert_eq!(out.samples, vec![0, 3, 6, 9]);

        let odd = frame((0..8).collect(), 44100, 1).downsample(16000);
        assert_eq!(odd.sample_rate, 22050);
        assert_eq!(odd.samples.len(), 4);
    }

    #[tokio::test]
    async fn taps_receive_same_frames_independently() {
        let (backend, feed) = ChannelBackend::new(16);
        let source = AudioSource::open(Box::new(backend)).await.unwrap();
        let mut a = source.tap();
        let mut b = source.tap();
        source.resume();

        feed.send(frame(vec![1; 4], 16000, 1)).await.unwrap();
        drop(feed);

        assert_eq!(a.recv().await.map(|f| f.samples.len()), Some(4));
        assert_eq!(b.recv().await.map(|f| f.samples.len()), Some(4));
        assert!(a.recv().await.is_none());
        source.finished().await;
        assert!(source.is_drained());
    }

    #[tokio::test]
    async fn unavailable_backend_fails_to_open() {
        let result = AudioSource::open(Box::new(ChannelBackend::unavailable("no mic"))).await;
        assert!(matches!(result, Err(DeviceError::Unavailable(_))));
    }
}
