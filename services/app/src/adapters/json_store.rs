//! services/app/src/adapters/json_store.rs
//!
//! This module contains the document store adapter, the concrete implementation
//! of the `SessionRepository` and `ChatRepository` ports from the `core` crate.
//!
//! Everything lives in one JSON document. Each mutation reads the whole
//! document, changes it and writes it back through a temporary file that is
//! renamed over the original. There is no locking: callers are expected to
//! await mutations one after another from a single logical writer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tubestudy_core::domain::{ChatSession, VideoSession};
use tubestudy_core::ports::{ChatRepository, SessionRepository, StoreResult};

pub const DATA_FILE_NAME: &str = "data.json";

/// Collections owned by other parts of the application. Kept as-is.
const FOREIGN_COLLECTIONS: [&str; 3] = ["notes", "todos", "reminders"];

//=========================================================================================
// Document Layout
//=========================================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataDocument {
    #[serde(default)]
    sessions: Vec<VideoSession>,
    #[serde(default)]
    chat_sessions: Vec<ChatSession>,
    /// Notes, todos, reminders and any key this store does not know about.
    #[serde(flatten)]
    other: Map<String, Value>,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A handle on the data document inside one data directory.
#[derive(Debug)]
pub struct JsonDocumentStore {
    path: PathBuf,
}

impl JsonDocumentStore {
    /// Opens the store in `dir`, creating the directory when needed.
    ///
    /// The document itself is created lazily by the first write.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(DATA_FILE_NAME);
        info!("Opened data store at {}", path.display());
        Ok(Self { path })
    }

    /// Releases the handle. Nothing is buffered, so there is nothing to flush.
    pub fn close(self) {
        info!("Closed data store at {}", self.path.display());
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document, treating a missing or corrupt file as empty.
    async fn read(&self) -> DataDocument {
        match self.load().await {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    "Could not read {}, using an empty document: {}",
                    self.path.display(),
                    e
                );
                DataDocument::default()
            }
        }
    }

    /// Reads the document for a mutation.
    ///
    /// A corrupt document is moved aside first so the following write cannot
    /// destroy what is left of it.
    async fn read_for_update(&self) -> StoreResult<DataDocument> {
        match self.load().await {
            Ok(document) => Ok(document),
            Err(LoadError::Corrupt(e)) => {
                let backup = self.path.with_extension("json.corrupt");
                warn!(
                    "{} is corrupt ({}), moving it to {}",
                    self.path.display(),
                    e,
                    backup.display()
                );
                tokio::fs::rename(&self.path, &backup).await?;
                Ok(DataDocument::default())
            }
            Err(LoadError::Io(e)) => Err(e.into()),
        }
    }

    async fn load(&self) -> Result<DataDocument, LoadError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DataDocument::default())
            }
            Err(e) => return Err(LoadError::Io(e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(DataDocument::default());
        }
        serde_json::from_slice(&bytes).map_err(LoadError::Corrupt)
    }

    async fn write(&self, document: &mut DataDocument) -> StoreResult<()> {
        for key in FOREIGN_COLLECTIONS {
            document
                .other
                .entry(key)
                .or_insert_with(|| Value::Array(Vec::new()));
        }
        let bytes = serde_json::to_vec_pretty(document)?;
        write_atomically(&self.path, &bytes).await
    }

    /// Runs one read-modify-write cycle.
    async fn update<T>(&self, change: impl FnOnce(&mut DataDocument) -> T) -> StoreResult<T> {
        let mut document = self.read_for_update().await?;
        let outcome = change(&mut document);
        self.write(&mut document).await?;
        Ok(outcome)
    }
}

#[derive(Debug, thiserror::Error)]
enum LoadError {
    #[error(transparent)]
    Io(std::io::Error),
    #[error(transparent)]
    Corrupt(serde_json::Error),
}

/// Writes `bytes` to a sibling temporary file and renames it over `path`.
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Inserts at the front, or replaces the item with the same id in place.
fn upsert_by<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T, &T) -> bool) {
    match items.iter_mut().find(|existing| same(existing, &item)) {
        Some(existing) => *existing = item,
        None => items.insert(0, item),
    }
}

//=========================================================================================
// `SessionRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionRepository for JsonDocumentStore {
    async fn list(&self) -> StoreResult<Vec<VideoSession>> {
        Ok(self.read().await.sessions)
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<VideoSession>> {
        Ok(self.read().await.sessions.into_iter().find(|s| s.id == id))
    }

    async fn get_by_video_id(&self, video_id: &str) -> StoreResult<Option<VideoSession>> {
        Ok(self
            .read()
            .await
            .sessions
            .into_iter()
            .find(|s| s.video_id == video_id))
    }

    async fn upsert(&self, session: VideoSession) -> StoreResult<()> {
        self.update(|document| upsert_by(&mut document.sessions, session, |a, b| a.id == b.id))
            .await
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.update(|document| {
            let before = document.sessions.len();
            document.sessions.retain(|s| s.id != id);
            document.sessions.len() != before
        })
        .await
    }
}

//=========================================================================================
// `ChatRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatRepository for JsonDocumentStore {
    async fn list_chats(&self) -> StoreResult<Vec<ChatSession>> {
        Ok(self.read().await.chat_sessions)
    }

    async fn chats_for_video(&self, video_session_id: &str) -> StoreResult<Vec<ChatSession>> {
        Ok(self
            .read()
            .await
            .chat_sessions
            .into_iter()
            .filter(|c| c.video_session_id == video_session_id)
            .collect())
    }

    async fn get_chat(&self, id: &str) -> StoreResult<Option<ChatSession>> {
        Ok(self
            .read()
            .await
            .chat_sessions
            .into_iter()
            .find(|c| c.id == id))
    }

    async fn upsert_chat(&self, chat: ChatSession) -> StoreResult<()> {
        self.update(|document| upsert_by(&mut document.chat_sessions, chat, |a, b| a.id == b.id))
            .await
    }

    async fn delete_chat(&self, id: &str) -> StoreResult<bool> {
        self.update(|document| {
            let before = document.chat_sessions.len();
            document.chat_sessions.retain(|c| c.id != id);
            document.chat_sessions.len() != before
        })
        .await
    }

    async fn delete_chats_for_video(&self, video_session_id: &str) -> StoreResult<usize> {
        self.update(|document| {
            let before = document.chat_sessions.len();
            document
                .chat_sessions
                .retain(|c| c.video_session_id != video_session_id);
            before - document.chat_sessions.len()
        })
        .await
    }
}
