use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::backend::{AudioFrame, AudioSource, FrameTap};
use super::encoder::{duration_of, encode_wav, SessionWriter};
use crate::error::{DeviceError, SessionError};
use crate::session::is_valid_session_id;

/// Chunk configuration
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Target duration of each chunk (default: 120 seconds)
    pub duration_target: Duration,
    /// Output directory for the whole-session artifact
    pub output_dir: PathBuf,
    /// Session ID (used for file names)
    pub session_id: String,
}

impl ChunkConfig {
    pub fn new(session_id: String, output_dir: PathBuf) -> Self {
        Self {
            duration_target: Duration::from_secs(120),
            output_dir,
            session_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Recording,
    Encoding,
    Uploaded,
    Failed,
}

/// A bounded audio segment, WAV encoded.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// 1-based capture order
    pub chunk_number: u32,
    pub duration_target: Duration,
    /// Audio-clock position of the first frame
    pub start_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_count: usize,
    /// Encoded WAV bytes
    pub payload: Vec<u8>,
    pub status: ChunkStatus,
}

impl AudioChunk {
    pub fn duration(&self) -> Duration {
        duration_of(self.sample_count, self.sample_rate, self.channels)
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// True when the chunk ended before reaching its target length.
    pub fn is_partial(&self) -> bool {
        self.duration() < self.duration_target
    }

    pub fn file_name(&self) -> String {
        format!("chunk-{:03}.wav", self.chunk_number)
    }
}

/// Why a chunk capture stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkEnd {
    /// The audio clock reached the duration target.
    TargetReached,
    /// Finished by hand.
    Stopped,
    /// The audio source closed.
    SourceClosed,
}

/// Splits the shared source into fixed-length chunks alongside one
/// continuous capture of the whole session.
pub struct AudioChunker {
    config: ChunkConfig,
    next_chunk_number: u32,
}

impl AudioChunker {
    pub fn new(config: ChunkConfig) -> Result<Self, DeviceError> {
        if !is_valid_session_id(&config.session_id) {
            return Err(DeviceError::Encoder(format!(
                "session id {:?} is not a valid file name",
                config.session_id
            )));
        }

        fs::create_dir_all(&config.output_dir).map_err(|e| {
            DeviceError::Encoder(format!(
                "Failed to create output directory {:?}: {}",
                config.output_dir, e
            ))
        })?;

        info!(
            "Chunker initialized: {} (chunks: {}s each)",
            config.session_id,
            config.duration_target.as_secs_f64()
        );

        Ok(Self {
            config,
            next_chunk_number: 1,
        })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Begin encoding the whole session to `<output_dir>/<session_id>.wav`.
    pub fn start_main_capture(&self, source: &AudioSource) -> Result<CaptureHandle, DeviceError> {
        if source.is_drained() {
            return Err(DeviceError::Unavailable("audio source closed".to_string()));
        }

        let path = self
            .config
            .output_dir
            .join(format!("{}.wav", self.config.session_id));
        let tap = source.tap();
        let (stop_tx, stop_rx) = watch::channel(false);

        info!("Main capture writing to {}", path.display());
        let task = tokio::spawn(run_main_capture(SessionWriter::new(path), tap, stop_rx));

        Ok(CaptureHandle { stop_tx, task })
    }

    /// Begin a new chunk reading from `tap`, numbered after the previous one.
    pub fn start_chunk(&mut self, tap: FrameTap) -> ChunkHandle {
        self.start_chunk_with_target(tap, self.config.duration_target)
    }

    pub fn start_chunk_with_target(&mut self, tap: FrameTap, duration_target: Duration) -> ChunkHandle {
        let chunk_number = self.next_chunk_number;
        self.next_chunk_number += 1;

        debug!("Starting chunk {}", chunk_number);

        let (stop_tx, stop_rx) = watch::channel(false);
        let (end_tx, end_rx) = watch::channel(None);
        let task = tokio::spawn(run_chunk(tap, duration_target, stop_rx, end_tx));

        ChunkHandle {
            inner: Arc::new(ChunkInner {
                chunk_number,
                duration_target,
                stop_tx,
                end_rx,
                task: Mutex::new(Some(task)),
                finished: OnceCell::new(),
                tap: StdMutex::new(None),
            }),
        }
    }

    /// Stop the chunk and return it. See [`ChunkHandle::finish`].
    pub async fn finish_chunk(&self, handle: &ChunkHandle) -> Result<AudioChunk, DeviceError> {
        handle.finish().await
    }
}

/// Controls the whole-session capture.
pub struct CaptureHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Result<SessionArtifact, SessionError>>,
}

impl CaptureHandle {
    /// Request a stop without waiting for the file to flush.
    pub fn signal_stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Stop the capture and wait for the artifact to flush.
    pub async fn finish(self) -> Result<SessionArtifact, SessionError> {
        self.stop_tx.send_replace(true);
        self.task.await?
    }
}

/// The single continuous recording of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionArtifact {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_count: usize,
}

impl SessionArtifact {
    pub fn duration(&self) -> Duration {
        duration_of(self.sample_count, self.sample_rate, self.channels)
    }
}

async fn run_main_capture(
    mut writer: SessionWriter,
    mut tap: FrameTap,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<SessionArtifact, SessionError> {
    let artifact_err = |e: anyhow::Error| SessionError::Artifact(format!("{:#}", e));

    loop {
        tokio::select! {
            _ = stop_requested(&mut stop_rx) => {
                while let Some(frame) = tap.try_recv() {
                    writer.write_frame(&frame).map_err(artifact_err)?;
                }
                break;
            }
            frame = tap.recv() => match frame {
                Some(frame) => writer.write_frame(&frame).map_err(artifact_err)?,
                None => break,
            },
        }
    }

    debug!("Main capture stopped after {} samples", writer.sample_count());

    let written = writer
        .finish()
        .map_err(artifact_err)?
        .ok_or_else(|| SessionError::Artifact("no audio was captured".to_string()))?;

    Ok(SessionArtifact {
        path: written.path,
        sample_rate: written.sample_rate,
        channels: written.channels,
        sample_count: written.sample_count,
    })
}

pub(crate) async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a stop.
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

/// Samples collected for one chunk before encoding.
struct ChunkBuffer {
    samples: Vec<i16>,
    start_ms: Option<u64>,
    sample_rate: u32,
    channels: u16,
}

impl ChunkBuffer {
    fn new() -> Self {
        Self {
            samples: Vec::new(),
            start_ms: None,
            sample_rate: 16000,
            channels: 1,
        }
    }

    fn is_past_target(&self, frame: &AudioFrame, target: Duration) -> bool {
        match self.start_ms {
            None => false,
            Some(start) => {
                frame.timestamp_ms.saturating_sub(start) >= target.as_millis() as u64
            }
        }
    }

    fn push(&mut self, frame: AudioFrame) {
        if self.start_ms.is_none() {
            self.start_ms = Some(frame.timestamp_ms);
            self.sample_rate = frame.sample_rate;
            self.channels = frame.channels;
        }
        self.samples.extend_from_slice(&frame.samples);
    }
}

struct ChunkCapture {
    buffer: ChunkBuffer,
    tap: FrameTap,
    end: ChunkEnd,
}

async fn run_chunk(
    mut tap: FrameTap,
    target: Duration,
    mut stop_rx: watch::Receiver<bool>,
    end_tx: watch::Sender<Option<ChunkEnd>>,
) -> ChunkCapture {
    let mut buffer = ChunkBuffer::new();

    let end = loop {
        tokio::select! {
            _ = stop_requested(&mut stop_rx) => {
                // Keep whatever already arrived, up to the boundary.
                let mut end = ChunkEnd::Stopped;
                while let Some(frame) = tap.try_recv() {
                    if buffer.is_past_target(&frame, target) {
                        tap.push_back(frame);
                        end = ChunkEnd::TargetReached;
                        break;
                    }
                    buffer.push(frame);
                }
                break end;
            }
            frame = tap.recv() => match frame {
                None => break ChunkEnd::SourceClosed,
                Some(frame) => {
                    if buffer.is_past_target(&frame, target) {
                        tap.push_back(frame);
                        break ChunkEnd::TargetReached;
                    }
                    buffer.push(frame);
                }
            },
        }
    };

    end_tx.send_replace(Some(end));
    ChunkCapture { buffer, tap, end }
}

/// Handle to one in-progress chunk. Cheap to clone; every clone finishes
/// the same chunk.
#[derive(Clone)]
pub struct ChunkHandle {
    inner: Arc<ChunkInner>,
}

struct ChunkInner {
    chunk_number: u32,
    duration_target: Duration,
    stop_tx: watch::Sender<bool>,
    end_rx: watch::Receiver<Option<ChunkEnd>>,
    task: Mutex<Option<JoinHandle<ChunkCapture>>>,
    finished: OnceCell<(AudioChunk, ChunkEnd)>,
    tap: StdMutex<Option<FrameTap>>,
}

impl ChunkHandle {
    pub fn chunk_number(&self) -> u32 {
        self.inner.chunk_number
    }

    /// Resolves when the capture stops on its own (target or source end)
    /// or after a stop was requested.
    pub async fn ended(&self) -> ChunkEnd {
        let mut end_rx = self.inner.end_rx.clone();
        let end = match end_rx.wait_for(|end| end.is_some()).await {
            Ok(end) => *end,
            Err(_) => None,
        };
        end.unwrap_or(ChunkEnd::Stopped)
    }

    /// How the capture ended, once finished.
    pub fn end_reason(&self) -> Option<ChunkEnd> {
        self.inner.finished.get().map(|(_, end)| *end)
    }

    /// Stop the encoder and yield the finished chunk.
    ///
    /// Both the rotation timer and a manual stop call this; whichever runs
    /// first defines the chunk and later calls return the same one.
    pub async fn finish(&self) -> Result<AudioChunk, DeviceError> {
        self.inner.stop_tx.send_replace(true);

        let (chunk, _) = self
            .inner
            .finished
            .get_or_try_init(|| async {
                let task = self.inner.task.lock().await.take().ok_or_else(|| {
                    DeviceError::Encoder(format!(
                        "chunk {} capture already consumed",
                        self.inner.chunk_number
                    ))
                })?;

                let capture = task.await.map_err(|e| {
                    error!("Chunk {} capture task failed: {}", self.inner.chunk_number, e);
                    DeviceError::Encoder(e.to_string())
                })?;
                let ChunkCapture { buffer, tap, end } = capture;

                let payload = if buffer.samples.is_empty() {
                    Vec::new()
                } else {
                    encode_wav(&buffer.samples, buffer.sample_rate, buffer.channels)
                        .map_err(|e| DeviceError::Encoder(format!("{:#}", e)))?
                };

                if let Ok(mut slot) = self.inner.tap.lock() {
                    *slot = Some(tap);
                }

                let chunk = AudioChunk {
                    chunk_number: self.inner.chunk_number,
                    duration_target: self.inner.duration_target,
                    start_ms: buffer.start_ms.unwrap_or(0),
                    sample_rate: buffer.sample_rate,
                    channels: buffer.channels,
                    sample_count: buffer.samples.len(),
                    payload,
                    status: ChunkStatus::Encoding,
                };

                info!(
                    "Chunk {} complete: {:.1}s from {:.1}s ({:?})",
                    chunk.chunk_number,
                    chunk.duration().as_secs_f64(),
                    chunk.start_ms as f64 / 1000.0,
                    end
                );

                Ok::<_, DeviceError>((chunk, end))
            })
            .await?;

        Ok(chunk.clone())
    }

    /// Take back the frame tap after [`finish`](Self::finish) so the next
    /// chunk continues exactly where this one stopped.
    pub fn take_tap(&self) -> Option<FrameTap> {
        self.inner.tap.lock().ok().and_then(|mut t| t.take())
    }
}
