//! Offline audio cache
//!
//! Playback resolves a lecture's audio through a fixed tier order:
//! memory, blob store (`files` tree), URL-keyed response cache, a local
//! folder granted this session, and finally the network URL. Every tier is
//! a `KeyValueBlobStore`; storage failures are logged and treated as misses.

mod fetch;
mod folder;
mod location;
mod offline;
mod response;
mod store;

pub use fetch::{AudioFetcher, HttpFetcher};
pub use folder::{
    FolderPicker, FolderStore, LocalFolderAccess, PresetFolderPicker, UserGesture,
    FOLDER_HANDLE_KEY,
};
pub use location::{file_name_of, AudioLocation, LocationError};
pub use offline::{CacheTier, OfflineAudioCache, ResolvedAudio, DEFAULT_MEMORY_LIMIT_BYTES};
pub use response::ResponseCache;
pub use store::{KeyValueBlobStore, MemoryBlobStore, OfflineDatabase, SledBlobStore};
