//! crates/tubestudy_core/src/sessions.rs
//!
//! Session-level workflows built on the repository ports.

use crate::domain::{StudyMaterials, VideoSession};
use crate::ports::{ChatRepository, SessionRepository, StoreError};
use crate::transcript::thumbnail_url;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything needed to create a session for a video seen for the first time.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub video_id: String,
    pub video_url: String,
    pub title: String,
    /// Derived from the video id when absent.
    pub thumbnail_url: Option<String>,
    pub transcript: String,
}

/// Returns the session for `new.video_id`, creating it only when none exists.
pub async fn get_or_create_session(
    repo: &dyn SessionRepository,
    new: NewSession,
) -> Result<VideoSession, SessionError> {
    if let Some(existing) = repo.get_by_video_id(&new.video_id).await? {
        return Ok(existing);
    }

    let session = VideoSession {
        id: Uuid::new_v4().to_string(),
        thumbnail_url: new
            .thumbnail_url
            .unwrap_or_else(|| thumbnail_url(&new.video_id)),
        video_id: new.video_id,
        video_url: new.video_url,
        title: new.title,
        transcript: new.transcript,
        created_at: Utc::now(),
        quiz_results: Vec::new(),
        study_materials: StudyMaterials::default(),
        latest_quiz: None,
    };
    repo.upsert(session.clone()).await?;
    info!(
        "Created session {} for video {}",
        session.id, session.video_id
    );
    Ok(session)
}

/// Overlays freshly generated materials onto a stored session and persists it.
pub async fn merge_study_material(
    repo: &dyn SessionRepository,
    session_id: &str,
    materials: StudyMaterials,
) -> Result<VideoSession, SessionError> {
    let mut session = repo
        .get_by_id(session_id)
        .await?
        .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
    session.study_materials.merge(materials);
    repo.upsert(session.clone()).await?;
    Ok(session)
}

/// Deletes a session together with every chat that refers to it.
///
/// Returns whether the session existed. Chats are removed first so a failed
/// session write never leaves chats pointing at a deleted session.
pub async fn delete_session(
    sessions: &dyn SessionRepository,
    chats: &dyn ChatRepository,
    session_id: &str,
) -> Result<bool, SessionError> {
    let removed_chats = chats.delete_chats_for_video(session_id).await?;
    let removed = sessions.delete(session_id).await?;
    info!(
        "Deleted session {} ({} chat session(s) removed)",
        session_id, removed_chats
    );
    Ok(removed)
}
