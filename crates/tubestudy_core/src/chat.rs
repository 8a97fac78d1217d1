//! crates/tubestudy_core/src/chat.rs
//!
//! The streaming chat controller for one video session.
//!
//! A controller runs at most one reply stream at a time. A reply is only
//! persisted once the stream finishes; a cancelled or failed reply leaves no
//! trace in the conversation or the store.

use crate::domain::{ChatMessage, ChatSession, VideoSession};
use crate::gateway::ProviderGateway;
use crate::ports::{ChatRepository, GatewayError, StoreError};
use chrono::Utc;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Longest chat title derived from the first user message, in characters.
pub const CHAT_TITLE_CHARS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Chat session {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The reply finished and the conversation was saved.
    Completed(ChatSession),
    /// The stream was cancelled; nothing was saved.
    Cancelled,
}

/// Builds a chat title from the first user message.
pub fn chat_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    match trimmed.char_indices().nth(CHAT_TITLE_CHARS) {
        Some((cut, _)) => format!("{}...", trimmed[..cut].trim_end()),
        None => trimmed.to_string(),
    }
}

//=========================================================================================
// Stop Handle
//=========================================================================================

/// Cancels the controller's in-flight stream from anywhere, e.g. a UI task.
#[derive(Clone, Default)]
pub struct StopHandle {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl StopHandle {
    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        // The slot only holds a token, so a poisoned lock is still consistent.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancels the active stream. Returns whether one was running.
    pub fn stop(&self) -> bool {
        match self.slot().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }

    fn install(&self, token: CancellationToken) {
        if let Some(previous) = self.slot().replace(token) {
            previous.cancel();
        }
    }

    fn clear(&self, token: &CancellationToken) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|active| active == token) {
            *slot = None;
        }
    }
}

/// Owns one stream's registration in a `StopHandle`.
///
/// Dropping it cancels the token and frees the slot, so a `send` future that
/// is dropped mid-stream does not leave the controller marked as streaming.
struct StreamGuard {
    stop: StopHandle,
    token: CancellationToken,
}

impl StreamGuard {
    fn install(stop: &StopHandle) -> Self {
        let token = CancellationToken::new();
        stop.install(token.clone());
        Self {
            stop: stop.clone(),
            token,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.token.cancel();
        self.stop.clear(&self.token);
    }
}

//=========================================================================================
// Controller
//=========================================================================================

pub struct ChatController {
    gateway: ProviderGateway,
    chats: Arc<dyn ChatRepository>,
    video_session_id: String,
    transcript: String,
    session: Option<ChatSession>,
    messages: Vec<ChatMessage>,
    /// Length of `messages` before an exchange that is not yet committed.
    pending: Option<usize>,
    stop: StopHandle,
}

impl ChatController {
    pub fn new(
        gateway: ProviderGateway,
        chats: Arc<dyn ChatRepository>,
        video_session: &VideoSession,
    ) -> Self {
        Self {
            gateway,
            chats,
            video_session_id: video_session.id.clone(),
            transcript: video_session.transcript.clone(),
            session: None,
            messages: Vec::new(),
            pending: None,
            stop: StopHandle::default(),
        }
    }

    /// The committed conversation. An exchange whose `send` never finished is hidden.
    pub fn messages(&self) -> &[ChatMessage] {
        match self.pending {
            Some(base_len) => self.messages.get(..base_len).unwrap_or(&self.messages),
            None => &self.messages,
        }
    }

    /// The persisted conversation currently open, if any.
    pub fn current_session(&self) -> Option<&ChatSession> {
        self.session.as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.stop.is_active()
    }

    /// Cancels the in-flight stream, if any.
    pub fn cancel(&self) -> bool {
        self.stop.stop()
    }

    /// Saved conversations about this video, most recently updated first.
    pub async fn load_history(&self) -> Result<Vec<ChatSession>, ChatError> {
        let mut chats = self.chats.chats_for_video(&self.video_session_id).await?;
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    /// Switches to a saved conversation, cancelling any in-flight stream.
    pub async fn open_session(&mut self, chat_id: &str) -> Result<(), ChatError> {
        self.cancel();
        self.discard_pending();
        let chat = self
            .chats
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(chat_id.to_string()))?;
        self.messages = chat.messages.clone();
        self.session = Some(chat);
        Ok(())
    }

    /// Starts an empty conversation, cancelling any in-flight stream.
    pub fn start_new_conversation(&mut self) {
        self.cancel();
        self.pending = None;
        self.session = None;
        self.messages.clear();
    }

    /// Drops the user message and partial reply of an uncommitted exchange.
    /// Returns whether there was one.
    fn discard_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(base_len) => {
                self.messages.truncate(base_len);
                true
            }
            None => false,
        }
    }

    /// Deletes a saved conversation; resets the controller if it was open.
    pub async fn delete_session(&mut self, chat_id: &str) -> Result<bool, ChatError> {
        let removed = self.chats.delete_chat(chat_id).await?;
        if self.session.as_ref().is_some_and(|s| s.id == chat_id) {
            self.start_new_conversation();
        }
        Ok(removed)
    }

    /// Sends a user message and streams the reply into the conversation.
    ///
    /// `on_update` receives the cumulative reply text after every chunk.
    pub async fn send<F>(
        &mut self,
        text: &str,
        model: &str,
        mut on_update: F,
    ) -> Result<SendOutcome, ChatError>
    where
        F: FnMut(&str),
    {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.discard_pending() {
            warn!(
                "Discarded an unfinished chat exchange for session {}",
                self.video_session_id
            );
        }

        let guard = StreamGuard::install(&self.stop);
        let token = guard.token.clone();

        let base_len = self.messages.len();
        self.pending = Some(base_len);
        self.messages.push(ChatMessage::user(text));
        let history = self.messages.clone();
        self.messages.push(ChatMessage::assistant(""));

        let streamed = self.stream_reply(&history, model, &token, &mut on_update).await;
        drop(guard);

        let outcome = match streamed {
            Ok(Some(_)) => self.persist(base_len).await,
            Ok(None) => {
                info!(
                    "Chat reply cancelled for session {}",
                    self.video_session_id
                );
                Ok(SendOutcome::Cancelled)
            }
            Err(e) => {
                warn!("Chat reply failed for session {}: {}", self.video_session_id, e);
                Err(e)
            }
        };
        match &outcome {
            Ok(SendOutcome::Completed(_)) => self.pending = None,
            _ => {
                self.discard_pending();
            }
        }
        outcome
    }

    /// Returns `None` when the stream was cancelled.
    async fn stream_reply<F>(
        &mut self,
        history: &[ChatMessage],
        model: &str,
        token: &CancellationToken,
        on_update: &mut F,
    ) -> Result<Option<String>, ChatError>
    where
        F: FnMut(&str),
    {
        let mut stream = self
            .gateway
            .stream_chat(&self.transcript, history, model, token.clone())
            .await?;

        let mut reply = String::new();
        while let Some(event) = stream.next().await {
            if token.is_cancelled() {
                return Ok(None);
            }
            reply = event?;
            if let Some(placeholder) = self.messages.last_mut() {
                placeholder.content.clone_from(&reply);
            }
            on_update(&reply);
        }

        if token.is_cancelled() {
            return Ok(None);
        }
        if reply.is_empty() {
            return Err(GatewayError::invalid_response().into());
        }
        Ok(Some(reply))
    }

    /// Saves the conversation after a finished reply.
    async fn persist(&mut self, base_len: usize) -> Result<SendOutcome, ChatError> {
        let now = Utc::now();
        if let Some(reply) = self.messages.last_mut() {
            reply.timestamp = now;
        }

        let previous = self.session.take();
        let chat = match previous.clone() {
            Some(mut chat) => {
                chat.messages = self.messages.clone();
                chat.updated_at = now;
                chat
            }
            None => ChatSession {
                id: Uuid::new_v4().to_string(),
                video_session_id: self.video_session_id.clone(),
                title: self
                    .messages
                    .get(base_len)
                    .map(|first| chat_title(&first.content))
                    .unwrap_or_default(),
                messages: self.messages.clone(),
                created_at: now,
                updated_at: now,
            },
        };

        match self.chats.upsert_chat(chat.clone()).await {
            Ok(()) => {
                self.session = Some(chat.clone());
                Ok(SendOutcome::Completed(chat))
            }
            Err(e) => {
                self.session = previous;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatRole, StudyMaterials};
    use crate::test_support::{MemoryRepository, ScriptedBackend};

    fn video_session() -> VideoSession {
        VideoSession {
            id: "video-session".into(),
            video_id: "vid".into(),
            video_url: "u".into(),
            title: "Lecture".into(),
            thumbnail_url: "t".into(),
            transcript: "The lecture covers lifetimes.".into(),
            created_at: Utc::now(),
            quiz_results: vec![],
            study_materials: StudyMaterials::default(),
            latest_quiz: None,
        }
    }

    fn controller(chunks: &[&str]) -> (ChatController, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::default());
        let gateway = ProviderGateway::new(Arc::new(ScriptedBackend::streaming(chunks)));
        (ChatController::new(gateway, repo.clone(), &video_session()), repo)
    }

    #[test]
    fn titles_are_truncated_with_an_ellipsis() {
        assert_eq!(chat_title("  short question "), "short question");
        let long = "x".repeat(80);
        assert_eq!(chat_title(&long), format!("{}...", "x".repeat(CHAT_TITLE_CHARS)));
    }

    #[tokio::test]
    async fn first_reply_creates_a_titled_session() {
        let (mut chat, repo) = controller(&["Life", "times ", "bound refs."]);
        let mut updates = Vec::new();

        let outcome = chat
            .send("What are lifetimes?", "m", |text| updates.push(text.to_string()))
            .await
            .unwrap();

        assert_eq!(updates, vec!["Life", "Lifetimes ", "Lifetimes bound refs."]);
        let SendOutcome::Completed(saved) = outcome else {
            panic!("expected a completed reply");
        };
        assert_eq!(saved.title, "What are lifetimes?");
        assert_eq!(saved.video_session_id, "video-session");
        assert_eq!(saved.messages.len(), 2);
        assert_eq!(saved.messages[0].role, ChatRole::User);
        assert_eq!(saved.messages[1].content, "Lifetimes bound refs.");
        assert_eq!(repo.list_chats().await.unwrap(), vec![saved]);
        assert!(!chat.is_streaming());
    }

    #[tokio::test]
    async fn later_replies_append_to_the_same_session() {
        let (mut chat, repo) = controller(&["ok"]);
        chat.send("first", "m", |_| {}).await.unwrap();
        let created = chat.current_session().unwrap().clone();

        let outcome = chat.send("second", "m", |_| {}).await.unwrap();

        let SendOutcome::Completed(saved) = outcome else {
            panic!("expected a completed reply");
        };
        assert_eq!(saved.id, created.id);
        assert_eq!(saved.title, "first");
        assert_eq!(saved.messages.len(), 4);
        assert!(saved.updated_at >= created.updated_at);
        assert_eq!(repo.list_chats().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelling_mid_stream_persists_nothing() {
        let (mut chat, repo) = controller(&["one ", "two ", "three ", "four"]);
        chat.send("earlier", "m", |_| {}).await.unwrap();
        let saved_before = repo.list_chats().await.unwrap();
        let visible_before = chat.messages().to_vec();

        let stop = chat.stop_handle();
        let mut delivered = 0;
        let outcome = chat
            .send("interrupt me", "m", |_| {
                delivered += 1;
                if delivered == 2 {
                    stop.stop();
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome, SendOutcome::Cancelled);
        assert_eq!(delivered, 2);
        assert_eq!(repo.list_chats().await.unwrap(), saved_before);
        assert_eq!(chat.messages(), visible_before.as_slice());
        assert!(!chat.is_streaming());
    }

    #[tokio::test]
    async fn dropping_a_send_mid_stream_leaves_nothing_behind() {
        let repo = Arc::new(MemoryRepository::default());
        let backend = Arc::new(ScriptedBackend::stalling(&["PARTIAL"]));
        let mut chat = ChatController::new(
            ProviderGateway::new(backend.clone()),
            repo.clone(),
            &video_session(),
        );

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            chat.send("q1", "m", |_| {}),
        )
        .await;

        assert!(abandoned.is_err());
        assert!(chat.messages().is_empty());
        assert!(!chat.is_streaming());
        assert!(!chat.cancel());

        let stop = chat.stop_handle();
        let outcome = chat
            .send("q2", "m", |_| {
                stop.stop();
            })
            .await
            .unwrap();
        assert_eq!(outcome, SendOutcome::Cancelled);

        let history = backend.last_request().unwrap().turns;
        assert!(history.iter().all(|turn| turn.content != "PARTIAL"));
        assert!(history.iter().all(|turn| turn.content != "q1"));
        assert!(chat.messages().is_empty());
        assert!(repo.list_chats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_rolls_back_the_exchange() {
        let repo = Arc::new(MemoryRepository::default());
        let gateway = ProviderGateway::new(Arc::new(ScriptedBackend::failing(
            GatewayError::network(),
        )));
        let mut chat = ChatController::new(gateway, repo.clone(), &video_session());

        let error = chat.send("hello", "m", |_| {}).await.unwrap_err();

        assert!(matches!(error, ChatError::Gateway(GatewayError::Network(_))));
        assert!(chat.messages().is_empty());
        assert!(repo.list_chats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_messages_are_rejected() {
        let (mut chat, _) = controller(&["x"]);
        assert!(matches!(
            chat.send("   ", "m", |_| {}).await,
            Err(ChatError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn switching_sessions_loads_their_messages() {
        let (mut chat, _) = controller(&["reply"]);
        chat.send("topic one", "m", |_| {}).await.unwrap();
        let first_id = chat.current_session().unwrap().id.clone();

        chat.start_new_conversation();
        assert!(chat.messages().is_empty());
        chat.send("topic two", "m", |_| {}).await.unwrap();

        let history = chat.load_history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].title, "topic two");

        chat.open_session(&first_id).await.unwrap();
        assert_eq!(chat.messages()[0].content, "topic one");
        assert!(chat.open_session("missing").await.is_err());
    }

    #[tokio::test]
    async fn deleting_the_open_session_resets_the_controller() {
        let (mut chat, repo) = controller(&["reply"]);
        chat.send("question", "m", |_| {}).await.unwrap();
        let id = chat.current_session().unwrap().id.clone();

        assert!(chat.delete_session(&id).await.unwrap());

        assert!(chat.current_session().is_none());
        assert!(chat.messages().is_empty());
        assert!(repo.list_chats().await.unwrap().is_empty());
    }

    #[test]
    fn stop_without_a_stream_is_a_no_op() {
        let handle = StopHandle::default();
        assert!(!handle.stop());
    }
}
