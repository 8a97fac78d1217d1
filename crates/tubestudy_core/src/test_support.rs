//! Test doubles shared by the unit tests of this crate.

use crate::domain::{ChatSession, ModelInfo, Provider, VideoSession};
use crate::ports::{
    ChatRepository, GatewayResult, GenerationRequest, GenerativeBackend, SessionRepository,
    StoreResult, TextStream,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Mutex;

//=========================================================================================
// Scripted Backend
//=========================================================================================

/// A backend that answers every request with a fixed reply or chunk list.
pub struct ScriptedBackend {
    reply: Mutex<GatewayResult<String>>,
    chunks: Vec<String>,
    /// Keeps the stream open without further chunks once they run out.
    stall: bool,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Mutex::new(Ok(reply.to_string())),
            chunks: Vec::new(),
            stall: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: crate::ports::GatewayError) -> Self {
        Self {
            reply: Mutex::new(Err(error)),
            chunks: Vec::new(),
            stall: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn streaming(chunks: &[&str]) -> Self {
        Self {
            reply: Mutex::new(Ok(chunks.concat())),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            stall: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Streams `chunks`, then never yields or ends.
    pub fn stalling(chunks: &[&str]) -> Self {
        Self {
            stall: true,
            ..Self::streaming(chunks)
        }
    }

    pub fn set_reply(&self, reply: GatewayResult<String>) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    fn provider(&self) -> Provider {
        Provider::Openai
    }

    async fn generate(&self, request: &GenerationRequest) -> GatewayResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.reply.lock().unwrap().clone()
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> GatewayResult<TextStream> {
        self.requests.lock().unwrap().push(request.clone());
        if let Err(e) = &*self.reply.lock().unwrap() {
            return Err(e.clone());
        }
        let chunks: Vec<GatewayResult<String>> = self.chunks.iter().cloned().map(Ok).collect();
        let chunks = futures::stream::iter(chunks);
        if self.stall {
            Ok(Box::pin(chunks.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(chunks))
        }
    }

    async fn list_models(&self, _api_key: &str) -> GatewayResult<Vec<ModelInfo>> {
        self.reply.lock().unwrap().clone().map(|_| Vec::new())
    }

    fn default_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo::new("default-model", "Default Model")]
    }
}

//=========================================================================================
// In-Memory Repository
//=========================================================================================

/// Keeps sessions and chats in memory with the same ordering rules as the document store.
#[derive(Default)]
pub struct MemoryRepository {
    sessions: Mutex<Vec<VideoSession>>,
    chats: Mutex<Vec<ChatSession>>,
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn list(&self) -> StoreResult<Vec<VideoSession>> {
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<VideoSession>> {
        Ok(self.sessions.lock().unwrap().iter().find(|s| s.id == id).cloned())
    }

    async fn get_by_video_id(&self, video_id: &str) -> StoreResult<Option<VideoSession>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.video_id == video_id)
            .cloned())
    }

    async fn upsert(&self, session: VideoSession) -> StoreResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session,
            None => sessions.insert(0, session),
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        Ok(sessions.len() != before)
    }
}

#[async_trait]
impl ChatRepository for MemoryRepository {
    async fn list_chats(&self) -> StoreResult<Vec<ChatSession>> {
        Ok(self.chats.lock().unwrap().clone())
    }

    async fn chats_for_video(&self, video_session_id: &str) -> StoreResult<Vec<ChatSession>> {
        Ok(self
            .chats
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.video_session_id == video_session_id)
            .cloned()
            .collect())
    }

    async fn get_chat(&self, id: &str) -> StoreResult<Option<ChatSession>> {
        Ok(self.chats.lock().unwrap().iter().find(|c| c.id == id).cloned())
    }

    async fn upsert_chat(&self, chat: ChatSession) -> StoreResult<()> {
        let mut chats = self.chats.lock().unwrap();
        match chats.iter_mut().find(|c| c.id == chat.id) {
            Some(existing) => *existing = chat,
            None => chats.insert(0, chat),
        }
        Ok(())
    }

    async fn delete_chat(&self, id: &str) -> StoreResult<bool> {
        let mut chats = self.chats.lock().unwrap();
        let before = chats.len();
        chats.retain(|c| c.id != id);
        Ok(chats.len() != before)
    }

    async fn delete_chats_for_video(&self, video_session_id: &str) -> StoreResult<usize> {
        let mut chats = self.chats.lock().unwrap();
        let before = chats.len();
        chats.retain(|c| c.video_session_id != video_session_id);
        Ok(before - chats.len())
    }
}
