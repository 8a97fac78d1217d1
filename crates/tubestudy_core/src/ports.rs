//! crates/tubestudy_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! Generative backends and the document store live behind these traits, so the
//! quiz, chat and analytics logic never depends on a specific vendor SDK or
//! storage format.

use crate::domain::{ChatRole, ChatSession, ModelInfo, Provider, VideoSession};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

//=========================================================================================
// Error and Result Types
//=========================================================================================

/// The normalized failure taxonomy of every generative backend.
///
/// Each variant carries a short message that callers can show verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Server(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Network(String),
    #[error("{0}")]
    InvalidResponse(String),
    #[error("{0}")]
    Unknown(String),
}

/// A convenience type alias for `Result<T, GatewayError>`.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failures of the persisted document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode document: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A convenience type alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

//=========================================================================================
// Generation Requests
//=========================================================================================

/// Sampling temperature used for every generation call.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

/// One role-tagged prompt turn.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTurn {
    pub role: ChatRole,
    pub content: String,
}

impl PromptTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A backend-independent generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub system: Option<String>,
    pub turns: Vec<PromptTurn>,
    pub format: ResponseFormat,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, format: ResponseFormat) -> Self {
        Self {
            model: model.into(),
            system: None,
            turns: Vec::new(),
            format,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_turn(mut self, turn: PromptTurn) -> Self {
        self.turns.push(turn);
        self
    }
}

/// A stream of text deltas produced by a backend.
pub type TextStream = Pin<Box<dyn Stream<Item = GatewayResult<String>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The capability interface every generative backend implements.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    fn provider(&self) -> Provider;

    /// Runs a request to completion and returns the reply text.
    async fn generate(&self, request: &GenerationRequest) -> GatewayResult<String>;

    /// Runs a request and yields the reply as text deltas, in order.
    async fn generate_stream(&self, request: &GenerationRequest) -> GatewayResult<TextStream>;

    /// Queries the backend's model catalog, filtered to chat-capable models.
    async fn list_models(&self, api_key: &str) -> GatewayResult<Vec<ModelInfo>>;

    /// The hardcoded catalog used whenever `list_models` cannot be trusted.
    fn default_models(&self) -> Vec<ModelInfo>;
}

/// Durable collection of video sessions.
///
/// Implementations assume a single logical writer: every mutation is a
/// read-modify-write of the whole collection.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// All sessions, most recently inserted first.
    async fn list(&self) -> StoreResult<Vec<VideoSession>>;

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<VideoSession>>;

    async fn get_by_video_id(&self, video_id: &str) -> StoreResult<Option<VideoSession>>;

    /// Inserts at the front, or replaces an existing record with the same `id` in place.
    async fn upsert(&self, session: VideoSession) -> StoreResult<()>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> StoreResult<bool>;
}

/// Durable collection of chat sessions.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn list_chats(&self) -> StoreResult<Vec<ChatSession>>;

    async fn chats_for_video(&self, video_session_id: &str) -> StoreResult<Vec<ChatSession>>;

    async fn get_chat(&self, id: &str) -> StoreResult<Option<ChatSession>>;

    /// Inserts at the front, or replaces an existing record with the same `id` in place.
    async fn upsert_chat(&self, chat: ChatSession) -> StoreResult<()>;

    async fn delete_chat(&self, id: &str) -> StoreResult<bool>;

    /// Removes every chat belonging to a video session and returns how many were removed.
    async fn delete_chats_for_video(&self, video_session_id: &str) -> StoreResult<usize>;
}
