pub mod backend;
pub mod chunk;
pub mod encoder;
pub mod file;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioInput, AudioSource,
    ChannelBackend, FrameTap,
};
pub use chunk::{
    AudioChunk, AudioChunker, CaptureHandle, ChunkConfig, ChunkEnd, ChunkHandle, ChunkStatus,
    SessionArtifact,
};
pub use encoder::encode_wav;
pub use file::{AudioFile, FileBackend};
