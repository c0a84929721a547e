//! Recording session management
//!
//! A `RecordingSession` owns one lecture capture:
//! - a continuous whole-session recording on disk
//! - fixed-length chunks sent for transcription as they complete
//! - the ordered transcript and per-chunk status
//! - the final save of audio plus transcript

mod config;
mod session;
mod state;
mod stats;
mod storage;

pub use config::{is_valid_session_id, SessionConfig};
pub use session::{FinalizedRecording, RecordingSession, DEFAULT_TITLE};
pub use state::{ChunkLedger, SessionState};
pub use stats::SessionStats;
pub use storage::{HttpRecordingStore, RecordingStore, RecordingUpload, SavedRecording};
