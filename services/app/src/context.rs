//! services/app/src/context.rs
//!
//! The application context: owns the store handles and the configured
//! generative backend for the lifetime of the process.

use crate::adapters::{GeminiBackend, JsonDocumentStore, OpenAiBackend, SettingsStore};
use crate::config::Config;
use crate::error::AppError;
use std::sync::Arc;
use tracing::{info, warn};
use tubestudy_core::chat::ChatController;
use tubestudy_core::domain::{AppSettings, Provider, VideoSession};
use tubestudy_core::gateway::ProviderGateway;
use tubestudy_core::ports::{ChatRepository, GenerativeBackend, SessionRepository};
use tubestudy_core::quiz::{QuizEngine, QuizError};
use tubestudy_core::sessions::SessionError;
use tubestudy_core::transcript::extract_video_id;

/// Builds the backend for the provider selected in `settings`.
pub fn backend_for(settings: &AppSettings) -> Arc<dyn GenerativeBackend> {
    let key = settings.active_api_key();
    if key.is_empty() {
        warn!(
            "No API key configured for {}; requests will be rejected",
            settings.provider.name()
        );
    }
    match settings.provider {
        Provider::Openai => Arc::new(OpenAiBackend::new(key)),
        Provider::Gemini => Arc::new(GeminiBackend::new(key)),
    }
}

/// Fills empty stored keys from the environment.
pub fn apply_env_overrides(settings: &mut AppSettings, config: &Config) {
    if settings.openai_api_key.trim().is_empty() {
        if let Some(key) = &config.openai_api_key {
            settings.openai_api_key = key.clone();
        }
    }
    if settings.gemini_api_key.trim().is_empty() {
        if let Some(key) = &config.gemini_api_key {
            settings.gemini_api_key = key.clone();
        }
    }
}

/// The selected model, or the backend's first default when none is selected.
pub fn resolve_model(settings: &AppSettings, backend: &dyn GenerativeBackend) -> String {
    let selected = settings.selected_model.trim();
    if !selected.is_empty() {
        return selected.to_string();
    }
    backend
        .default_models()
        .first()
        .map(|m| m.id.clone())
        .unwrap_or_default()
}

//=========================================================================================
// AppContext
//=========================================================================================

pub struct AppContext {
    pub config: Arc<Config>,
    /// Stored settings with environment keys applied.
    pub settings: AppSettings,
    stored_settings: AppSettings,
    /// The model every generation call uses.
    pub model: String,
    store: Arc<JsonDocumentStore>,
    settings_store: SettingsStore,
    gateway: ProviderGateway,
}

impl AppContext {
    /// Opens both stores in the configured data directory and wires the backend.
    pub async fn open(config: Config) -> Result<Self, AppError> {
        let settings_store = SettingsStore::open(&config.data_dir).await?;
        let store = Arc::new(JsonDocumentStore::open(&config.data_dir).await?);

        let stored_settings = settings_store.load().await;
        let mut settings = stored_settings.clone();
        apply_env_overrides(&mut settings, &config);

        let backend = backend_for(&settings);
        let model = resolve_model(&settings, backend.as_ref());
        info!(
            "Using {} with model {}",
            settings.provider.name(),
            if model.is_empty() { "<none>" } else { model.as_str() }
        );

        Ok(Self {
            config: Arc::new(config),
            settings,
            stored_settings,
            model,
            store,
            settings_store,
            gateway: ProviderGateway::new(backend),
        })
    }

    /// Releases the store handles.
    pub fn close(self) {
        let Self {
            store,
            settings_store,
            ..
        } = self;
        match Arc::try_unwrap(store) {
            Ok(store) => store.close(),
            Err(_) => warn!("Data store is still referenced; it closes with its last handle"),
        }
        settings_store.close();
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    pub fn sessions(&self) -> Arc<dyn SessionRepository> {
        self.store.clone()
    }

    pub fn chats(&self) -> Arc<dyn ChatRepository> {
        self.store.clone()
    }

    /// The settings as persisted, without environment keys.
    pub fn stored_settings(&self) -> &AppSettings {
        &self.stored_settings
    }

    /// Persists new settings and rebuilds the backend from them.
    pub async fn update_settings(&mut self, settings: AppSettings) -> Result<(), AppError> {
        self.settings_store.save(&settings).await?;
        let mut effective = settings.clone();
        apply_env_overrides(&mut effective, &self.config);
        let backend = backend_for(&effective);
        self.model = resolve_model(&effective, backend.as_ref());
        self.gateway = ProviderGateway::new(backend);
        self.settings = effective;
        self.stored_settings = settings;
        Ok(())
    }

    /// Finds a session by video URL, video id or session id.
    pub async fn find_session(&self, reference: &str) -> Result<VideoSession, AppError> {
        let sessions = self.sessions();
        if let Some(video_id) = extract_video_id(reference) {
            if let Some(session) = sessions.get_by_video_id(&video_id).await? {
                return Ok(session);
            }
        }
        sessions
            .get_by_id(reference)
            .await?
            .ok_or_else(|| SessionError::NotFound(reference.to_string()).into())
    }

    pub async fn quiz_engine(&self, session_id: &str) -> Result<QuizEngine, QuizError> {
        QuizEngine::open(self.gateway.clone(), self.sessions(), session_id).await
    }

    pub fn chat_controller(&self, session: &VideoSession) -> ChatController {
        ChatController::new(self.gateway.clone(), self.chats(), session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_only_fill_empty_settings() {
        let mut config = Config::for_data_dir("/tmp/unused");
        config.openai_api_key = Some("sk-env".into());
        config.gemini_api_key = Some("g-env".into());
        let mut settings = AppSettings {
            gemini_api_key: "g-stored".into(),
            ..AppSettings::default()
        };

        apply_env_overrides(&mut settings, &config);

        assert_eq!(settings.openai_api_key, "sk-env");
        assert_eq!(settings.gemini_api_key, "g-stored");
    }

    #[test]
    fn model_defaults_to_the_backend_catalog() {
        let settings = AppSettings {
            provider: Provider::Gemini,
            ..AppSettings::default()
        };
        let backend = backend_for(&settings);
        assert_eq!(backend.provider(), Provider::Gemini);
        assert_eq!(resolve_model(&settings, backend.as_ref()), "gemini-2.5-flash");

        let chosen = AppSettings {
            selected_model: " gpt-4o ".into(),
            ..AppSettings::default()
        };
        assert_eq!(resolve_model(&chosen, backend.as_ref()), "gpt-4o");
    }
}
