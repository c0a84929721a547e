//! Chunk transcription
//!
//! - `Transcriber`: seam to the speech-to-text backend
//! - `HttpTranscriber`: multipart upload to the lecture server
//! - `TranscriptionClient`: submits chunks, keeps the transcript in chunk order

mod client;
mod parts;

pub use client::{HttpTranscriber, Transcriber, TranscriptionClient, DEFAULT_MAX_UPLOAD_BYTES};
pub use parts::{TranscriptPart, TranscriptParts, MAX_CHUNK_NUMBER};
