pub mod analytics;
pub mod chat;
pub mod domain;
pub mod gateway;
pub mod ports;
pub mod quiz;
pub mod sessions;
pub mod transcript;

#[cfg(test)]
mod test_support;

pub use domain::{
    AppSettings, ChatMessage, ChatRole, ChatSession, Flashcard, MaterialType, MindMapNode,
    ModelInfo, Provider, Quiz, QuizQuestion, QuizResult, StudyMaterials, VideoSession,
};
pub use gateway::ProviderGateway;
pub use ports::{
    ChatRepository, GatewayError, GatewayResult, GenerativeBackend, SessionRepository,
    StoreError, StoreResult,
};
