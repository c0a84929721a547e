use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::KeyValueBlobStore;
use crate::error::StorageError;

/// Key of the remembered folder in the `handles` store.
pub const FOLDER_HANDLE_KEY: &str = "audioFolder";

/// Proof that the caller is reacting to a user action (a click, a key
/// press). Folder access can only be requested with one of these, so a
/// background lookup can never trigger a prompt.
#[derive(Debug)]
pub struct UserGesture {
    _private: (),
}

impl UserGesture {
    /// Call from input handlers only.
    pub fn from_user_action() -> Self {
        Self { _private: () }
    }
}

/// Asks the user for a folder. Returns `None` when the user declines or
/// the platform has no picker.
#[async_trait]
pub trait FolderPicker: Send + Sync {
    async fn pick_folder(&self) -> Option<PathBuf>;
}

/// Picker that answers with a preset folder (command line `--folder`).
pub struct PresetFolderPicker(pub Option<PathBuf>);

#[async_trait]
impl FolderPicker for PresetFolderPicker {
    async fn pick_folder(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// Tracks the local audio folder and whether it may be read in this
/// session.
///
/// A folder remembered from an earlier session is not readable until the
/// user grants it again.
pub struct LocalFolderAccess {
    handles: Arc<dyn KeyValueBlobStore>,
    granted: RwLock<Option<PathBuf>>,
    request_lock: Mutex<()>,
}

impl LocalFolderAccess {
    pub fn new(handles: Arc<dyn KeyValueBlobStore>) -> Self {
        Self {
            handles,
            granted: RwLock::new(None),
            request_lock: Mutex::new(()),
        }
    }

    /// Store for the granted folder, without prompting. `None` if nothing
    /// was granted this session.
    pub fn granted_store(&self) -> Option<FolderStore> {
        let granted = self.granted.read().ok()?;
        granted.as_ref().map(|root| FolderStore::new(root.clone()))
    }

    pub fn is_granted(&self) -> bool {
        self.granted.read().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Folder picked in an earlier session, if any. Not a grant.
    pub async fn remembered(&self) -> Option<PathBuf> {
        match self.handles.get(FOLDER_HANDLE_KEY).await {
            Ok(Some(raw)) => String::from_utf8(raw).ok().map(PathBuf::from),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read remembered folder: {}", e);
                None
            }
        }
    }

    /// Ask the user for a folder. One request runs at a time.
    pub async fn request(&self, _gesture: UserGesture, picker: &dyn FolderPicker) -> Option<PathBuf> {
        let _in_flight = self.request_lock.lock().await;

        let Some(folder) = picker.pick_folder().await else {
            info!("Local folder access declined or unsupported");
            return None;
        };

        if !tokio::fs::metadata(&folder)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            warn!("Picked folder {} is not a directory", folder.display());
            return None;
        }

        if let Err(e) = self
            .handles
            .put(FOLDER_HANDLE_KEY, folder.to_string_lossy().as_bytes())
            .await
        {
            warn!("Failed to remember folder {}: {}", folder.display(), e);
        }

        if let Ok(mut granted) = self.granted.write() {
            *granted = Some(folder.clone());
        }

        info!("Local folder access granted: {}", folder.display());
        Some(folder)
    }
}

/// Files inside a granted folder, keyed by file name.
pub struct FolderStore {
    root: PathBuf,
}

impl FolderStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StorageError::Store(format!("invalid file name {:?}", name)));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl KeyValueBlobStore for FolderStore {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!("Read {} bytes from {}", bytes.len(), path.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, name: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        tokio::fs::write(&path, value).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
