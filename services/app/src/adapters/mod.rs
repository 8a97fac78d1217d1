pub mod gemini_llm;
pub mod json_store;
pub mod openai_llm;
pub mod settings_store;

pub use gemini_llm::GeminiBackend;
pub use json_store::JsonDocumentStore;
pub use openai_llm::OpenAiBackend;
pub use settings_store::SettingsStore;
