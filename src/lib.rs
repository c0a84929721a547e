pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod transcription;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioChunk, AudioChunker, AudioFile,
    AudioFrame, AudioInput, AudioSource, ChannelBackend, ChunkConfig, ChunkStatus, FileBackend,
    SessionArtifact,
};
pub use cache::{AudioLocation, CacheTier, OfflineAudioCache, ResolvedAudio};
pub use config::Config;
pub use error::{DeviceError, SaveError, SessionError, StorageError, TranscribeError};
pub use http::{create_router, AppState};
pub use session::{
    FinalizedRecording, HttpRecordingStore, RecordingSession, RecordingStore, SavedRecording,
    SessionConfig, SessionState, SessionStats,
};
pub use transcription::{HttpTranscriber, Transcriber, TranscriptPart, TranscriptionClient};
