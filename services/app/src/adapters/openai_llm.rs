//! services/app/src/adapters/openai_llm.rs
//!
//! This module contains the adapter for OpenAI chat models.
//! It implements the `GenerativeBackend` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        ResponseFormat as OpenAiResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};
use tubestudy_core::domain::{ChatRole, ModelInfo, Provider};
use tubestudy_core::ports::{
    GatewayError, GatewayResult, GenerationRequest, GenerativeBackend, ResponseFormat, TextStream,
};

/// Id prefixes of chat-capable model families.
const CHAT_MODEL_PREFIXES: &[&str] = &["gpt-", "o1", "o3", "o4"];

/// Id fragments of models that cannot serve plain chat completions.
const EXCLUDED_MODEL_FRAGMENTS: &[&str] = &[
    "instruct",
    "audio",
    "realtime",
    "transcribe",
    "tts",
    "image",
    "search",
];

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `GenerativeBackend` using OpenAI chat completions.
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
}

impl OpenAiBackend {
    /// Creates a new `OpenAiBackend` authenticated with `api_key`.
    pub fn new(api_key: &str) -> Self {
        Self::with_client(client_without_retries(
            OpenAIConfig::new().with_api_key(api_key),
        ))
    }

    pub fn with_client(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }

    fn build_request(&self, request: &GenerationRequest) -> GatewayResult<CreateChatCompletionRequest> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            Vec::with_capacity(request.turns.len() + 1);

        if let Some(system) = &request.system {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.clone())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
            );
        }
        for turn in &request.turns {
            let message = match turn.role {
                ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.clone())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
                ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.clone())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
            };
            messages.push(message);
        }

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&request.model)
            .messages(messages)
            .temperature(request.temperature)
            .n(1);
        if request.format == ResponseFormat::Json {
            builder.response_format(OpenAiResponseFormat::JsonObject);
        }
        builder.build().map_err(map_openai_error)
    }
}

//=========================================================================================
// `GenerativeBackend` Trait Implementation
//=========================================================================================

#[async_trait]
impl GenerativeBackend for OpenAiBackend {
    fn provider(&self) -> Provider {
        Provider::Openai
    }

    async fn generate(&self, request: &GenerationRequest) -> GatewayResult<String> {
        let body = self.build_request(request)?;
        debug!("OpenAI completion with {}", request.model);

        let response = self
            .client
            .chat()
            .create(body)
            .await
            .map_err(map_openai_error)?;

        // Extract the text content from the first choice in the response.
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                warn!("OpenAI response contained no text content");
                GatewayError::invalid_response()
            })
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> GatewayResult<TextStream> {
        let body = self.build_request(request)?;
        debug!("OpenAI streamed completion with {}", request.model);

        let stream = self
            .client
            .chat()
            .create_stream(body)
            .await
            .map_err(map_openai_error)?;

        let deltas = stream.map(|chunk| {
            chunk.map_err(map_openai_error).map(|response| {
                response
                    .choices
                    .into_iter()
                    .filter_map(|choice| choice.delta.content)
                    .collect::<String>()
            })
        });
        Ok(Box::pin(deltas))
    }

    async fn list_models(&self, api_key: &str) -> GatewayResult<Vec<ModelInfo>> {
        let config = self.client.config().clone().with_api_key(api_key);
        let response = client_without_retries(config)
            .models()
            .list().await.map_err(map_openai_error)?;
        Ok(filter_chat_models(response.data.into_iter().map(|m| m.id)))
    }

    fn default_models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo::new("gpt-4o-mini", "GPT-4o mini"),
            ModelInfo::new("gpt-4o", "GPT-4o"),
            ModelInfo::new("gpt-4.1-mini", "GPT-4.1 mini"),
            ModelInfo::new("gpt-4.1", "GPT-4.1"),
            ModelInfo::new("o3-mini", "o3-mini"),
        ]
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Builds a client that surfaces 429 and 5xx responses on the first attempt.
/// The SDK's default backoff would otherwise retry them for minutes.
pub fn client_without_retries(config: OpenAIConfig) -> Client<OpenAIConfig> {
    let backoff = backoff::ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::ZERO))
        .build();
    Client::with_config(config).with_backoff(backoff)
}

/// Maps the symbolic `code` or `type` of an API error body.
fn map_api_error(error: &ApiError) -> GatewayError {
    [error.code.as_deref(), error.r#type.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|name| GatewayError::from_symbol(name, Some(&error.message)))
        .unwrap_or_else(|| GatewayError::classify(&error.message))
}

/// Keeps chat-capable model ids, sorted and deduplicated.
pub fn filter_chat_models(ids: impl IntoIterator<Item = String>) -> Vec<ModelInfo> {
    let mut ids: Vec<String> = ids
        .into_iter()
        .filter(|id| CHAT_MODEL_PREFIXES.iter().any(|p| id.starts_with(p)))
        .filter(|id| !EXCLUDED_MODEL_FRAGMENTS.iter().any(|f| id.contains(f)))
        .collect();
    ids.sort();
    ids.dedup();
    ids.into_iter()
        .map(|id| ModelInfo::new(id.clone(), id))
        .collect()
}

/// Maps an SDK error onto the gateway taxonomy, respecting the orphan rule.
pub(crate) fn map_openai_error(error: OpenAIError) -> GatewayError {
    let mapped = match &error {
        OpenAIError::Reqwest(e) if e.is_timeout() => GatewayError::timeout(),
        OpenAIError::Reqwest(e) if e.is_connect() => GatewayError::network(),
        OpenAIError::Reqwest(e) => match e.status() {
            Some(status) => GatewayError::from_response(status.as_u16(), &e.to_string()),
            None => GatewayError::classify(&e.to_string()),
        },
        OpenAIError::ApiError(api) => map_api_error(api),
        OpenAIError::JSONDeserialize(_) => GatewayError::invalid_response(),
        other => GatewayError::classify(&other.to_string()),
    };
    warn!("OpenAI request failed ({}): {}", mapped.kind(), error);
    mapped
}
