//! crates/tubestudy_core/src/gateway/mod.rs
//!
//! The Provider Gateway: one backend-independent contract for quiz, study
//! material and chat generation on top of any `GenerativeBackend`.

pub mod errors;
pub mod parse;
pub mod prompts;

use crate::domain::{
    ChatMessage, ChatRole, MaterialType, ModelInfo, Provider, QuizQuestion, StudyMaterials,
};
use crate::ports::{
    GatewayResult, GenerationRequest, GenerativeBackend, PromptTurn, ResponseFormat, TextStream,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A stream of **cumulative** reply text: every item holds the whole reply so far.
pub type ChatStream = TextStream;

#[derive(Clone)]
pub struct ProviderGateway {
    backend: Arc<dyn GenerativeBackend>,
}

impl ProviderGateway {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self { backend }
    }

    pub fn provider(&self) -> Provider {
        self.backend.provider()
    }

    /// Generates `count` shuffled multiple-choice questions from a transcript.
    pub async fn generate_quiz(
        &self,
        transcript: &str,
        count: usize,
        model: &str,
    ) -> GatewayResult<Vec<QuizQuestion>> {
        let count = count.max(1);
        info!(
            "Generating {} quiz questions with {} ({})",
            count,
            self.provider().name(),
            model
        );
        let request = GenerationRequest::new(model, ResponseFormat::Json)
            .with_system(prompts::QUIZ_SYSTEM_PROMPT)
            .with_turn(PromptTurn::user(prompts::quiz_user_prompt(transcript, count)));

        let raw = self.backend.generate(&request).await?;
        parse::parse_quiz_questions(&raw, count, &mut rand::rng())
    }

    /// Generates a single study material. Only the requested field is set.
    pub async fn generate_study_material(
        &self,
        material: MaterialType,
        transcript: &str,
        model: &str,
    ) -> GatewayResult<StudyMaterials> {
        info!(
            "Generating {} with {} ({})",
            material,
            self.provider().name(),
            model
        );
        let format = if material.is_structured() {
            ResponseFormat::Json
        } else {
            ResponseFormat::Text
        };
        let request = GenerationRequest::new(model, format)
            .with_system(prompts::material_system_prompt())
            .with_turn(PromptTurn::user(prompts::material_user_prompt(
                material, transcript,
            )));

        let raw = self.backend.generate(&request).await?;

        let mut materials = StudyMaterials::default();
        match material {
            MaterialType::Summary => materials.summary = Some(parse::strip_wrapping_fence(&raw)),
            MaterialType::StudyGuide => {
                materials.study_guide = Some(parse::strip_wrapping_fence(&raw))
            }
            MaterialType::Roadmap => materials.roadmap = Some(parse::strip_wrapping_fence(&raw)),
            MaterialType::MindMap => materials.mind_map = Some(parse::parse_mind_map(&raw)?),
            MaterialType::Flashcards => {
                materials.flashcards = Some(parse::parse_flashcards(&raw)?)
            }
        }
        Ok(materials)
    }

    /// Answers the last user turn of `history` in one piece.
    pub async fn chat(
        &self,
        transcript: &str,
        history: &[ChatMessage],
        model: &str,
    ) -> GatewayResult<String> {
        let request = chat_request(transcript, history, model);
        self.backend.generate(&request).await
    }

    /// Streams the answer to the last user turn of `history` as cumulative text.
    ///
    /// Cancelling the token ends the stream at once, even while the backend is
    /// stalled between chunks, and no further text is yielded.
    pub async fn stream_chat(
        &self,
        transcript: &str,
        history: &[ChatMessage],
        model: &str,
        cancel: CancellationToken,
    ) -> GatewayResult<ChatStream> {
        let request = chat_request(transcript, history, model);
        let mut deltas = self.backend.generate_stream(&request).await?;

        Ok(Box::pin(async_stream::stream! {
            let mut reply = String::new();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Chat stream cancelled after {} characters", reply.len());
                        break;
                    }
                    next = deltas.next() => next,
                };
                match next {
                    None => break,
                    Some(Err(e)) => {
                        yield Err(e);
                        break;
                    }
                    Some(Ok(delta)) => {
                        if delta.is_empty() {
                            continue;
                        }
                        reply.push_str(&delta);
                        if cancel.is_cancelled() {
                            continue;
                        }
                        yield Ok(reply.clone());
                    }
                }
            }
        }))
    }

    /// Lists chat models for `api_key`. Never fails: falls back to the backend's defaults.
    pub async fn list_models(&self, api_key: &str) -> Vec<ModelInfo> {
        match self.backend.list_models(api_key).await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => {
                warn!(
                    "{} returned no usable models, using defaults",
                    self.provider().name()
                );
                self.backend.default_models()
            }
            Err(e) => {
                warn!(
                    "Listing {} models failed ({}), using defaults",
                    self.provider().name(),
                    e.kind()
                );
                self.backend.default_models()
            }
        }
    }
}

fn chat_request(transcript: &str, history: &[ChatMessage], model: &str) -> GenerationRequest {
    let mut request = GenerationRequest::new(model, ResponseFormat::Text)
        .with_system(prompts::chat_system_prompt(transcript));
    request.turns = history
        .iter()
        .filter(|m| !(m.role == ChatRole::Assistant && m.content.is_empty()))
        .map(|m| PromptTurn {
            role: m.role,
            content: m.content.clone(),
        })
        .collect();
    request
}
