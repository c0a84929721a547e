//! HTTP API server for external control
//!
//! - POST /sessions/record/start - Start recording from an input
//! - POST /sessions/record/stop/:id - Stop and finalize a recording
//! - POST /sessions/:id/save - Save a finalized recording
//! - GET /sessions/:id/status - Query session status
//! - GET /sessions/:id/transcript - Get the transcript so far
//! - GET /lectures/:id/audio?url= - Resolve playable audio
//! - POST /lectures/:id/offline - Save lecture audio for offline use
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
