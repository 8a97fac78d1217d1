//! services/app/src/adapters/gemini_llm.rs
//!
//! This module contains the adapter for Google Gemini models, talking to the
//! Generative Language REST API directly with `reqwest`.
//! It implements the `GenerativeBackend` port from the `core` crate.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use tubestudy_core::domain::{ChatRole, ModelInfo, Provider};
use tubestudy_core::ports::{
    GatewayError, GatewayResult, GenerationRequest, GenerativeBackend, ResponseFormat, TextStream,
};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Id fragments of models that cannot serve text generation.
const EXCLUDED_MODEL_FRAGMENTS: &[&str] = &["embedding", "vision", "tts"];

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<GeminiModel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiModel {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `GenerativeBackend` against the Gemini REST API.
#[derive(Clone)]
pub struct GeminiBackend {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiBackend {
    /// Creates a new `GeminiBackend` authenticated with `api_key`.
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Points the backend at another API root, e.g. a proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post(
        &self,
        url: &str,
        body: &GenerateContentBody<'_>,
    ) -> GatewayResult<reqwest::Response> {
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        ensure_success(response).await
    }
}

fn build_body(request: &GenerationRequest) -> GenerateContentBody<'_> {
    GenerateContentBody {
        system_instruction: request.system.as_deref().map(|text| Content {
            role: None,
            parts: vec![Part { text }],
        }),
        contents: request
            .turns
            .iter()
            .map(|turn| Content {
                role: Some(match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "model",
                }),
                parts: vec![Part {
                    text: &turn.content,
                }],
            })
            .collect(),
        generation_config: GenerationConfig {
            temperature: request.temperature,
            response_mime_type: match request.format {
                ResponseFormat::Json => Some("application/json"),
                ResponseFormat::Text => None,
            },
        },
    }
}

//=========================================================================================
// `GenerativeBackend` Trait Implementation
//=========================================================================================

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn generate(&self, request: &GenerationRequest) -> GatewayResult<String> {
        let url = self.endpoint(&request.model, "generateContent");
        debug!("Gemini generateContent with {}", request.model);

        let response = self.post(&url, &build_body(request)).await?;
        let body = response.text().await.map_err(map_reqwest_error)?;
        let text = decode_chunk(&body)?;
        if text.trim().is_empty() {
            warn!("Gemini response contained no text content");
            return Err(GatewayError::invalid_response());
        }
        Ok(text)
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> GatewayResult<TextStream> {
        let url = format!(
            "{}?alt=sse",
            self.endpoint(&request.model, "streamGenerateContent")
        );
        debug!("Gemini streamGenerateContent with {}", request.model);

        let response = self.post(&url, &build_body(request)).await?;
        let mut bytes = response.bytes_stream();

        Ok(Box::pin(async_stream::stream! {
            let mut lines = SseLines::default();
            let mut failed = false;
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(map_reqwest_error(e));
                        failed = true;
                        break;
                    }
                };
                for payload in lines.push(&chunk) {
                    let decoded = decode_chunk(&payload);
                    let stop = decoded.is_err();
                    yield decoded;
                    if stop {
                        failed = true;
                        break;
                    }
                }
                if failed {
                    break;
                }
            }
            if !failed {
                if let Some(payload) = lines.finish() {
                    yield decode_chunk(&payload);
                }
            }
        }))
    }

    async fn list_models(&self, api_key: &str) -> GatewayResult<Vec<ModelInfo>> {
        let url = format!("{}/models?pageSize=1000", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = ensure_success(response).await?;
        let body = response.text().await.map_err(map_reqwest_error)?;
        let list: ModelList =
            serde_json::from_str(&body).map_err(|_| GatewayError::invalid_response())?;
        Ok(filter_generation_models(list.models))
    }

    fn default_models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo::new("gemini-2.5-flash", "Gemini 2.5 Flash"),
            ModelInfo::new("gemini-2.5-pro", "Gemini 2.5 Pro"),
            ModelInfo::new("gemini-2.0-flash", "Gemini 2.0 Flash"),
            ModelInfo::new("gemini-1.5-flash", "Gemini 1.5 Flash"),
        ]
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn filter_generation_models(models: Vec<GeminiModel>) -> Vec<ModelInfo> {
    models
        .into_iter()
        .filter(|m| {
            m.supported_generation_methods
                .iter()
                .any(|method| method == "generateContent")
        })
        .filter_map(|m| {
            let id = m.name.strip_prefix("models/").unwrap_or(&m.name).to_string();
            let usable = id.starts_with("gemini-")
                && !EXCLUDED_MODEL_FRAGMENTS.iter().any(|f| id.contains(f));
            usable.then(|| ModelInfo::new(id.clone(), m.display_name.unwrap_or(id)))
        })
        .collect()
}

/// Decodes one `generateContent` response body (or SSE payload) into its text.
fn decode_chunk(payload: &str) -> GatewayResult<String> {
    match serde_json::from_str::<GenerateContentResponse>(payload) {
        Ok(response) if !response.candidates.is_empty() => Ok(response.text()),
        // A chunk without candidates is either an error envelope or an empty keep-alive.
        Ok(_) if payload.contains("\"error\"") => Err(GatewayError::classify(payload)),
        Ok(_) => Ok(String::new()),
        Err(e) => {
            warn!("Undecodable Gemini payload: {}", e);
            Err(GatewayError::invalid_response())
        }
    }
}

async fn ensure_success(response: reqwest::Response) -> GatewayResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let error = GatewayError::from_response(status.as_u16(), &body);
    warn!("Gemini returned {} ({})", status, error.kind());
    Err(error)
}

fn map_reqwest_error(error: reqwest::Error) -> GatewayError {
    let mapped = if error.is_timeout() {
        GatewayError::timeout()
    } else if error.is_connect() {
        GatewayError::network()
    } else if error.is_decode() {
        GatewayError::invalid_response()
    } else if let Some(status) = error.status() {
        GatewayError::from_response(status.as_u16(), &error.to_string())
    } else {
        GatewayError::classify(&error.to_string())
    };
    warn!("Gemini request failed ({}): {}", mapped.kind(), error);
    mapped
}

/// Splits a server-sent event byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line arrives, so multi-byte characters
/// split across chunks decode correctly.
#[derive(Default)]
struct SseLines {
    pending: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            if let Some(payload) = sse_data(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        sse_data(&rest)
    }
}

fn sse_data(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        None
    } else {
        Some(data.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tubestudy_core::ports::PromptTurn;

    #[test]
    fn sse_lines_reassemble_split_chunks() {
        let mut lines = SseLines::default();
        let first = lines.push(b"data: {\"a\":1}\r\n\r\nda");
        let second = lines.push(b"ta: {\"b\":\xC3");
        let third = lines.push(b"\xA9}\n: keep-alive\n\n");

        assert_eq!(first, vec!["{\"a\":1}"]);
        assert!(second.is_empty());
        assert_eq!(third, vec!["{\"b\":é}"]);
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn trailing_payload_without_newline_is_flushed() {
        let mut lines = SseLines::default();
        assert!(lines.push(b"data: last").is_empty());
        assert_eq!(lines.finish().as_deref(), Some("last"));
    }

    #[test]
    fn chunks_decode_to_candidate_text() {
        let payload = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        assert_eq!(decode_chunk(payload).unwrap(), "Hello");
        assert_eq!(decode_chunk(r#"{"usageMetadata":{}}"#).unwrap(), "");
    }

    #[test]
    fn error_payloads_are_classified() {
        let payload = r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded"}}"#;
        assert!(matches!(
            decode_chunk(payload),
            Err(GatewayError::RateLimited(_))
        ));
        assert!(matches!(
            decode_chunk("not json"),
            Err(GatewayError::InvalidResponse(_))
        ));
    }

    #[test]
    fn body_maps_roles_and_json_mode() {
        let request = GenerationRequest::new("gemini-2.5-flash", ResponseFormat::Json)
            .with_system("be brief")
            .with_turn(PromptTurn::user("q"))
            .with_turn(PromptTurn::assistant("a"));

        let value = serde_json::to_value(build_body(&request)).unwrap();

        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert!((value["generationConfig"]["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn text_body_omits_the_mime_type() {
        let request = GenerationRequest::new("gemini-2.5-flash", ResponseFormat::Text);
        let value = serde_json::to_value(build_body(&request)).unwrap();
        assert!(value["generationConfig"].get("responseMimeType").is_none());
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn endpoints_accept_prefixed_model_names() {
        let backend = GeminiBackend::new("key").with_base_url("http://localhost:8080/v1beta/");
        assert_eq!(
            backend.endpoint("models/gemini-2.5-pro", "generateContent"),
            "http://localhost:8080/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn catalog_keeps_generation_models() {
        let list: ModelList = serde_json::from_str(
            r#"{"models": [
                {"name": "models/gemini-2.5-flash", "displayName": "Gemini 2.5 Flash",
                 "supportedGenerationMethods": ["generateContent", "countTokens"]},
                {"name": "models/gemini-embedding-001",
                 "supportedGenerationMethods": ["embedContent"]},
                {"name": "models/gemini-2.5-flash-preview-tts",
                 "supportedGenerationMethods": ["generateContent"]},
                {"name": "models/gemini-pro-vision",
                 "supportedGenerationMethods": ["generateContent"]},
                {"name": "models/gemma-3-27b-it",
                 "supportedGenerationMethods": ["generateContent"]},
                {"name": "models/gemini-2.0-flash",
                 "supportedGenerationMethods": ["generateContent"]}
            ]}"#,
        )
        .unwrap();

        let models = filter_generation_models(list.models);

        assert_eq!(
            models,
            vec![
                ModelInfo::new("gemini-2.5-flash", "Gemini 2.5 Flash"),
                ModelInfo::new("gemini-2.0-flash", "gemini-2.0-flash"),
            ]
        );
    }
}
