//! crates/tubestudy_core/src/domain.rs
//!
//! Defines the core data structures for the application.
//! Field names serialize as camelCase so the persisted documents keep a
//! stable, UI-friendly layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

//=========================================================================================
// Video Sessions
//=========================================================================================

/// A video's transcript plus everything generated from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSession {
    pub id: String,
    /// Source identifier. Unique across the collection.
    pub video_id: String,
    pub video_url: String,
    pub title: String,
    pub thumbnail_url: String,
    pub transcript: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub quiz_results: Vec<QuizResult>,
    #[serde(default)]
    pub study_materials: StudyMaterials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_quiz: Option<Quiz>,
}

//=========================================================================================
// Quizzes
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub title: String,
    pub source_url: String,
    pub questions: Vec<QuizQuestion>,
    /// Monotonic per session, starting at 1.
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    /// 1-based position within the quiz.
    pub id: u32,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: usize,
    #[serde(default)]
    pub explanation: String,
}

impl QuizQuestion {
    pub fn correct_option(&self) -> Option<&str> {
        self.options.get(self.correct_answer).map(String::as_str)
    }
}

/// An immutable record of one completed quiz attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub quiz: Quiz,
    /// One entry per question; `None` means the question was left unanswered.
    pub answers: Vec<Option<usize>>,
    pub score: u32,
    pub total_questions: u32,
    pub completed_at: DateTime<Utc>,
}

impl QuizResult {
    /// Score as a whole percentage, `round(score / total * 100)`.
    pub fn percentage(&self) -> u32 {
        if self.total_questions == 0 {
            return 0;
        }
        (f64::from(self.score) / f64::from(self.total_questions) * 100.0).round() as u32
    }
}

//=========================================================================================
// Study Materials
//=========================================================================================

/// Independently generated study artifacts. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyMaterials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_guide: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roadmap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mind_map: Option<MindMapNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flashcards: Option<Vec<Flashcard>>,
}

impl StudyMaterials {
    /// Overlays every field present in `other`, leaving the rest untouched.
    pub fn merge(&mut self, other: StudyMaterials) {
        if other.summary.is_some() {
            self.summary = other.summary;
        }
        if other.study_guide.is_some() {
            self.study_guide = other.study_guide;
        }
        if other.roadmap.is_some() {
            self.roadmap = other.roadmap;
        }
        if other.mind_map.is_some() {
            self.mind_map = other.mind_map;
        }
        if other.flashcards.is_some() {
            self.flashcards = other.flashcards;
        }
    }

    pub fn has(&self, material: MaterialType) -> bool {
        match material {
            MaterialType::Summary => self.summary.is_some(),
            MaterialType::StudyGuide => self.study_guide.is_some(),
            MaterialType::Roadmap => self.roadmap.is_some(),
            MaterialType::MindMap => self.mind_map.is_some(),
            MaterialType::Flashcards => self.flashcards.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindMapNode {
    pub label: String,
    #[serde(default)]
    pub children: Vec<MindMapNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MaterialType {
    Summary,
    StudyGuide,
    Roadmap,
    MindMap,
    Flashcards,
}

impl MaterialType {
    pub const ALL: [MaterialType; 5] = [
        MaterialType::Summary,
        MaterialType::StudyGuide,
        MaterialType::Roadmap,
        MaterialType::MindMap,
        MaterialType::Flashcards,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialType::Summary => "summary",
            MaterialType::StudyGuide => "studyGuide",
            MaterialType::Roadmap => "roadmap",
            MaterialType::MindMap => "mindMap",
            MaterialType::Flashcards => "flashcards",
        }
    }

    /// Structured materials are requested and parsed as JSON.
    pub fn is_structured(&self) -> bool {
        matches!(self, MaterialType::MindMap | MaterialType::Flashcards)
    }
}

impl fmt::Display for MaterialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown material type: {0}")]
pub struct UnknownMaterialType(pub String);

impl FromStr for MaterialType {
    type Err = UnknownMaterialType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MaterialType::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownMaterialType(s.to_string()))
    }
}

//=========================================================================================
// Chat
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A persisted conversation about one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    /// Lookup-only reference to the owning `VideoSession`.
    pub video_session_id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//=========================================================================================
// Settings and Providers
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Openai,
    Gemini,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Openai => "OpenAI",
            Provider::Gemini => "Gemini",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::Openai),
            "gemini" => Ok(Provider::Gemini),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

pub const DEFAULT_QUESTION_COUNT: u32 = 10;

fn default_question_count() -> u32 {
    DEFAULT_QUESTION_COUNT
}

/// User preferences owned by the settings collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default)]
    pub selected_model: String,
    #[serde(default = "default_question_count")]
    pub question_count: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            openai_api_key: String::new(),
            gemini_api_key: String::new(),
            selected_model: String::new(),
            question_count: DEFAULT_QUESTION_COUNT,
        }
    }
}

impl AppSettings {
    /// The API key belonging to the selected provider.
    pub fn active_api_key(&self) -> &str {
        match self.provider {
            Provider::Openai => &self.openai_api_key,
            Provider::Gemini => &self.gemini_api_key,
        }
    }
}

/// An entry of a backend's model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}
