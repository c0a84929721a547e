use super::config::SessionConfig;
use super::state::{ChunkLedger, SessionState};
use super::stats::SessionStats;
use super::storage::{RecordingStore, RecordingUpload, SavedRecording};
use crate::audio::chunk::stop_requested;
use crate::audio::{
    AudioBackend, AudioChunk, AudioChunker, AudioSource, CaptureHandle, ChunkConfig, ChunkEnd,
    ChunkHandle, ChunkStatus, FrameTap, SessionArtifact,
};
use crate::error::{DeviceError, SaveError, SessionError};
use crate::transcription::{TranscriptPart, Transcriber, TranscriptionClient};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Title used when the user leaves it blank.
pub const DEFAULT_TITLE: &str = "Untitled Lecture";

/// One continuous lecture capture: a whole-session recording plus
/// fixed-length chunks sent for transcription as they complete.
pub struct RecordingSession {
    /// Session configuration
    config: SessionConfig,

    /// Chunk upload and ordered transcript
    transcription: TranscriptionClient,

    /// Lifecycle state
    state: Mutex<SessionState>,

    /// When recording started
    started_at: Mutex<Option<DateTime<Utc>>>,

    /// When stop was requested
    stopped_at: Mutex<Option<DateTime<Utc>>>,

    /// Status of every chunk started so far
    ledger: Arc<Mutex<ChunkLedger>>,

    /// Captures running while in `Recording`
    active: Mutex<Option<ActiveCapture>>,
}

struct ActiveCapture {
    source: Arc<AudioSource>,
    main: CaptureHandle,
    stop_tx: watch::Sender<bool>,
    driver: JoinHandle<()>,
    current: Arc<Mutex<Option<ChunkHandle>>>,
}

impl RecordingSession {
    /// Create a new session in the `Idle` state
    pub fn new(config: SessionConfig, transcriber: Arc<dyn Transcriber>) -> Self {
        info!("Creating recording session: {}", config.session_id);

        Self {
            config,
            transcription: TranscriptionClient::new(transcriber),
            state: Mutex::new(SessionState::Idle),
            started_at: Mutex::new(None),
            stopped_at: Mutex::new(None),
            ledger: Arc::new(Mutex::new(ChunkLedger::default())),
            active: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Acquire the audio device and start recording.
    ///
    /// If the device cannot be acquired the session moves to `Aborted` and
    /// nothing is left running.
    pub async fn start(&self, backend: Box<dyn AudioBackend>) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if !state.can_transition_to(SessionState::Recording) {
            return Err(SessionError::InvalidState {
                from: *state,
                action: "start",
            });
        }

        if let Err(e) = self.config.validate() {
            error!("Refusing to start recording session: {}", e);
            state.transition(SessionState::Aborted, "start")?;
            return Err(e);
        }

        info!("Starting recording session: {}", self.config.session_id);

        match self.acquire(backend).await {
            Ok(active) => {
                state.transition(SessionState::Recording, "start")?;
                *self.active.lock().await = Some(active);
                *self.started_at.lock().await = Some(Utc::now());
                info!("Recording session started successfully");
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to start recording session {}: {}",
                    self.config.session_id, e
                );
                state.transition(SessionState::Aborted, "start")?;
                Err(e.into())
            }
        }
    }

    async fn acquire(&self, backend: Box<dyn AudioBackend>) -> Result<ActiveCapture, DeviceError> {
        let chunker = AudioChunker::new(ChunkConfig {
            duration_target: self.config.chunk_duration,
            output_dir: self.config.recordings_path.clone(),
            session_id: self.config.session_id.clone(),
        })?;

        let source = Arc::new(AudioSource::open(backend).await?);

        let main = match chunker.start_main_capture(&source) {
            Ok(main) => main,
            Err(e) => {
                source.close().await;
                return Err(e);
            }
        };
        let first_tap = source.tap();
        source.resume();

        let (stop_tx, stop_rx) = watch::channel(false);
        let current = Arc::new(Mutex::new(None));
        let driver = ChunkDriver {
            chunker,
            transcription: self.transcription.clone(),
            ledger: Arc::clone(&self.ledger),
            current: Arc::clone(&current),
        };
        let driver = tokio::spawn(driver.run(first_tap, stop_rx));

        Ok(ActiveCapture {
            source,
            main,
            stop_tx,
            driver,
            current,
        })
    }

    /// Stop recording and finalize.
    ///
    /// The chunk in progress is finished and submitted even if it is
    /// short. Returns once the whole-session recording is flushed and every
    /// submitted chunk has succeeded or failed; failed chunks leave gaps in
    /// the transcript.
    pub async fn stop(&self) -> Result<FinalizedRecording, SessionError> {
        let active = {
            let mut state = self.state.lock().await;
            if !state.can_transition_to(SessionState::Finalizing) {
                return Err(SessionError::InvalidState {
                    from: *state,
                    action: "stop",
                });
            }
            let Some(active) = self.active.lock().await.take() else {
                return Err(SessionError::InvalidState {
                    from: *state,
                    action: "stop",
                });
            };
            state.transition(SessionState::Finalizing, "stop")?;
            *self.stopped_at.lock().await = Some(Utc::now());
            active
        };

        info!("Stopping recording session: {}", self.config.session_id);

        active.stop_tx.send_replace(true);
        let current = active.current.lock().await.clone();
        if let Some(handle) = current {
            if let Err(e) = handle.finish().await {
                warn!("Failed to finish chunk {}: {}", handle.chunk_number(), e);
            }
        }

        let (artifact, driver) = tokio::join!(active.main.finish(), active.driver);
        active.source.close().await;

        if let Err(e) = driver {
            error!("Chunk driver task panicked: {}", e);
        }

        let artifact = match artifact {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(
                    "Recording session {} produced no recording: {}",
                    self.config.session_id, e
                );
                self.state
                    .lock()
                    .await
                    .transition(SessionState::Aborted, "finalize")?;
                return Err(e);
            }
        };

        let transcript = self.transcription.combine().await;
        let parts = self.transcription.parts().await;
        let failed_chunks = self.ledger.lock().await.with_status(ChunkStatus::Failed);

        self.state
            .lock()
            .await
            .transition(SessionState::Saved, "finalize")?;

        info!(
            "Recording session finalized: {} ({:.1}s, {} parts, {} failed chunks)",
            self.config.session_id,
            artifact.duration().as_secs_f64(),
            parts.len(),
            failed_chunks.len()
        );

        Ok(FinalizedRecording {
            session_id: self.config.session_id.clone(),
            artifact,
            transcript,
            parts,
            failed_chunks,
        })
    }

    /// Resolves when the audio input has ended on its own (file replay
    /// finished, device unplugged). Returns immediately if not recording.
    pub async fn input_finished(&self) {
        let source = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(active) => Arc::clone(&active.source),
                None => return,
            }
        };
        source.finished().await;
    }

    /// Transcript received so far, in chunk order.
    pub async fn transcript(&self) -> String {
        self.transcription.combine().await
    }

    pub async fn transcript_parts(&self) -> Vec<TranscriptPart> {
        self.transcription.parts().await
    }

    pub async fn chunk_status(&self, chunk_number: u32) -> Option<ChunkStatus> {
        self.ledger.lock().await.status(chunk_number)
    }

    pub async fn chunk_statuses(&self) -> Vec<(u32, ChunkStatus)> {
        self.ledger.lock().await.iter().collect()
    }

    /// Get current session statistics
    pub async fn stats(&self) -> SessionStats {
        let state = *self.state.lock().await;
        let started_at = *self.started_at.lock().await;
        let ended_at = self.stopped_at.lock().await.unwrap_or_else(Utc::now);
        let duration_secs = started_at
            .map(|t| ended_at.signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        let (chunks_count, chunks_uploaded, chunks_failed) = {
            let ledger = self.ledger.lock().await;
            (
                ledger.len(),
                ledger.count(ChunkStatus::Uploaded),
                ledger.count(ChunkStatus::Failed),
            )
        };

        SessionStats {
            state,
            started_at,
            duration_secs,
            chunks_count,
            chunks_uploaded,
            chunks_failed,
            transcript_parts_count: self.transcription.parts().await.len(),
        }
    }
}

impl Drop for RecordingSession {
    /// Dropping a session mid-recording is a best-effort stop: captures are
    /// told to stop and finish in the background if a runtime is around.
    /// Nothing guarantees the recording or transcript complete.
    fn drop(&mut self) {
        let Some(active) = self.active.get_mut().take() else {
            return;
        };

        warn!(
            "Recording session {} dropped while recording; stopping without saving",
            self.config.session_id
        );
        active.stop_tx.send_replace(true);
        active.main.signal_stop();

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = active.main.finish().await {
                    debug!("Abandoned capture ended with: {}", e);
                }
                let _ = active.driver.await;
                active.source.close().await;
            });
        }
    }
}

/// Rotates chunks until stopped and submits each finished chunk.
struct ChunkDriver {
    chunker: AudioChunker,
    transcription: TranscriptionClient,
    ledger: Arc<Mutex<ChunkLedger>>,
    current: Arc<Mutex<Option<ChunkHandle>>>,
}

impl ChunkDriver {
    async fn run(mut self, mut tap: FrameTap, mut stop_rx: watch::Receiver<bool>) {
        let mut submissions = Vec::new();

        loop {
            let handle = self.chunker.start_chunk(tap);
            let number = handle.chunk_number();
            self.ledger.lock().await.set(number, ChunkStatus::Recording);
            *self.current.lock().await = Some(handle.clone());

            tokio::select! {
                _ = handle.ended() => {}
                _ = stop_requested(&mut stop_rx) => {}
            }

            self.ledger.lock().await.set(number, ChunkStatus::Encoding);
            let finished = self.chunker.finish_chunk(&handle).await;
            self.current.lock().await.take();

            let chunk = match finished {
                Ok(chunk) => chunk,
                Err(e) => {
                    error!("Chunk {} could not be encoded: {}", number, e);
                    self.ledger.lock().await.set(number, ChunkStatus::Failed);
                    break;
                }
            };

            if chunk.is_empty() {
                debug!("Discarding empty chunk {}", number);
                self.ledger.lock().await.discard(number);
            } else {
                submissions.push(self.submit(chunk));
            }

            // After a stop, keep rotating only while buffered audio still
            // fills chunks past their boundary.
            let end = handle.end_reason().unwrap_or(ChunkEnd::Stopped);
            match (end, handle.take_tap()) {
                (ChunkEnd::TargetReached, Some(next)) => tap = next,
                _ => break,
            }
        }

        debug!("Waiting for {} chunk submissions", submissions.len());
        for result in futures::future::join_all(submissions).await {
            if let Err(e) = result {
                error!("Chunk submission task panicked: {}", e);
            }
        }
    }

    fn submit(&self, chunk: AudioChunk) -> JoinHandle<()> {
        let transcription = self.transcription.clone();
        let ledger = Arc::clone(&self.ledger);

        tokio::spawn(async move {
            let number = chunk.chunk_number;
            let status = match transcription.submit(chunk).await {
                Ok(part) => {
                    transcription.append_ordered(part).await;
                    ChunkStatus::Uploaded
                }
                Err(_) => ChunkStatus::Failed,
            };
            ledger.lock().await.set(number, status);
        })
    }
}

/// A stopped session's output, ready to be saved once.
#[derive(Debug)]
pub struct FinalizedRecording {
    session_id: String,
    artifact: SessionArtifact,
    transcript: String,
    parts: Vec<TranscriptPart>,
    failed_chunks: Vec<u32>,
}

impl FinalizedRecording {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn artifact(&self) -> &SessionArtifact {
        &self.artifact
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn parts(&self) -> &[TranscriptPart] {
        &self.parts
    }

    /// Chunks whose transcription failed; their text is missing from the
    /// transcript.
    pub fn failed_chunks(&self) -> &[u32] {
        &self.failed_chunks
    }

    /// Replace the transcript, e.g. after the user filled in a gap.
    pub fn set_transcript(&mut self, transcript: impl Into<String>) {
        self.transcript = transcript.into();
    }

    /// Upload the recording and transcript. Consumes the recording on
    /// success; on failure it comes back inside the error.
    pub async fn save(
        self,
        store: &dyn RecordingStore,
        title: Option<&str>,
        course_id: Option<&str>,
    ) -> Result<SavedRecording, SaveError> {
        let audio = match tokio::fs::read(&self.artifact.path).await {
            Ok(audio) => audio,
            Err(e) => {
                return Err(SaveError {
                    reason: format!("cannot read {}: {}", self.artifact.path.display(), e),
                    recording: Box::new(self),
                })
            }
        };

        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE)
            .to_string();

        let upload = RecordingUpload {
            audio,
            file_name: format!("{}.wav", self.session_id),
            title,
            transcription: self.transcript.clone(),
            course_id: course_id.map(str::to_string),
        };

        match store.save(upload).await {
            Ok(saved) => {
                info!("Recording session {} saved", self.session_id);
                Ok(saved)
            }
            Err(e) => {
                error!("Failed to save recording session {}: {:#}", self.session_id, e);
                Err(SaveError {
                    reason: format!("{:#}", e),
                    recording: Box::new(self),
                })
            }
        }
    }
}
