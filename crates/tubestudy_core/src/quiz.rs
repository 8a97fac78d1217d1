//! crates/tubestudy_core/src/quiz.rs
//!
//! The quiz state machine: `Idle → Generating → Ready → InProgress → Completed`.
//!
//! One engine drives the quizzes of one video session. Completed attempts are
//! appended to the session's `quiz_results` and never touched again.

use crate::domain::{Quiz, QuizQuestion, QuizResult, VideoSession};
use crate::gateway::ProviderGateway;
use crate::ports::{GatewayError, SessionRepository, StoreError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    #[error("Cannot {action} while the quiz is {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },
    #[error("Option {choice} does not exist for question {question}")]
    InvalidOption { question: u32, choice: usize },
    #[error("Session {0} not found")]
    SessionNotFound(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuizState {
    Idle,
    Generating,
    Ready(Quiz),
    InProgress {
        quiz: Quiz,
        answers: Vec<Option<usize>>,
    },
    Completed(QuizResult),
}

impl QuizState {
    pub fn name(&self) -> &'static str {
        match self {
            QuizState::Idle => "idle",
            QuizState::Generating => "generating",
            QuizState::Ready(_) => "ready",
            QuizState::InProgress { .. } => "in progress",
            QuizState::Completed(_) => "completed",
        }
    }
}

/// The version the next generated quiz of `session` gets.
pub fn next_version(session: &VideoSession) -> u32 {
    let from_results = session.quiz_results.iter().map(|r| r.quiz.version);
    let from_latest = session.latest_quiz.iter().map(|q| q.version);
    from_results.chain(from_latest).max().unwrap_or(0) + 1
}

/// Number of positions where the answer matches the correct option.
pub fn score(questions: &[QuizQuestion], answers: &[Option<usize>]) -> u32 {
    questions
        .iter()
        .zip(answers)
        .filter(|(q, a)| **a == Some(q.correct_answer))
        .count() as u32
}

pub struct QuizEngine {
    gateway: ProviderGateway,
    sessions: Arc<dyn SessionRepository>,
    session_id: String,
    state: QuizState,
}

impl QuizEngine {
    /// Creates an idle engine for a session.
    pub fn new(
        gateway: ProviderGateway,
        sessions: Arc<dyn SessionRepository>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            sessions,
            session_id: session_id.into(),
            state: QuizState::Idle,
        }
    }

    /// Creates an engine that starts `Ready` with the session's latest quiz, if it has one.
    pub async fn open(
        gateway: ProviderGateway,
        sessions: Arc<dyn SessionRepository>,
        session_id: impl Into<String>,
    ) -> Result<Self, QuizError> {
        let mut engine = Self::new(gateway, sessions, session_id);
        let session = engine.load_session().await?;
        if let Some(quiz) = session.latest_quiz {
            engine.state = QuizState::Ready(quiz);
        }
        Ok(engine)
    }

    pub fn state(&self) -> &QuizState {
        &self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The question awaiting an answer, when a quiz is ready or in progress.
    pub fn current_question(&self) -> Option<&QuizQuestion> {
        match &self.state {
            QuizState::Ready(quiz) => quiz.questions.first(),
            QuizState::InProgress { quiz, answers } => quiz.questions.get(answers.len()),
            _ => None,
        }
    }

    async fn load_session(&self) -> Result<VideoSession, QuizError> {
        self.sessions
            .get_by_id(&self.session_id)
            .await?
            .ok_or_else(|| QuizError::SessionNotFound(self.session_id.clone()))
    }

    /// Generates a new quiz for the session and makes it the session's latest quiz.
    ///
    /// On a gateway failure the engine returns to `Idle` and the error is surfaced.
    pub async fn generate(&mut self, count: usize, model: &str) -> Result<Quiz, QuizError> {
        if matches!(
            self.state,
            QuizState::Generating | QuizState::InProgress { .. }
        ) {
            return Err(QuizError::InvalidState {
                action: "generate a quiz",
                state: self.state.name(),
            });
        }

        let mut session = self.load_session().await?;
        self.state = QuizState::Generating;

        let questions = match self
            .gateway
            .generate_quiz(&session.transcript, count, model)
            .await
        {
            Ok(questions) => questions,
            Err(e) => {
                error!(
                    "Quiz generation failed for session {}: {}",
                    self.session_id, e
                );
                self.state = QuizState::Idle;
                return Err(e.into());
            }
        };

        let quiz = Quiz {
            title: session.title.clone(),
            source_url: session.video_url.clone(),
            questions,
            version: next_version(&session),
            created_at: Utc::now(),
        };
        session.latest_quiz = Some(quiz.clone());
        if let Err(e) = self.sessions.upsert(session).await {
            self.state = QuizState::Idle;
            return Err(e.into());
        }
        info!(
            "Quiz v{} with {} questions ready for session {}",
            quiz.version,
            quiz.questions.len(),
            self.session_id
        );

        self.state = QuizState::Ready(quiz.clone());
        Ok(quiz)
    }

    /// Answers the current question; `None` leaves it unanswered.
    ///
    /// Returns the result once the last question has been answered.
    pub async fn answer(&mut self, choice: Option<usize>) -> Result<Option<QuizResult>, QuizError> {
        let (quiz, mut answers) = match std::mem::replace(&mut self.state, QuizState::Idle) {
            QuizState::Ready(quiz) => (quiz, Vec::new()),
            QuizState::InProgress { quiz, answers } => (quiz, answers),
            other => {
                let state = other.name();
                self.state = other;
                return Err(QuizError::InvalidState {
                    action: "answer",
                    state,
                });
            }
        };

        let Some(question) = quiz.questions.get(answers.len()) else {
            self.state = QuizState::Ready(quiz);
            return Err(QuizError::InvalidState {
                action: "answer",
                state: "empty",
            });
        };
        if let Some(index) = choice {
            if index >= question.options.len() {
                let error = QuizError::InvalidOption {
                    question: question.id,
                    choice: index,
                };
                self.state = if answers.is_empty() {
                    QuizState::Ready(quiz)
                } else {
                    QuizState::InProgress { quiz, answers }
                };
                return Err(error);
            }
        }
        answers.push(choice);

        if answers.len() < quiz.questions.len() {
            self.state = QuizState::InProgress { quiz, answers };
            return Ok(None);
        }

        let result = QuizResult {
            score: score(&quiz.questions, &answers),
            total_questions: quiz.questions.len() as u32,
            answers,
            quiz,
            completed_at: Utc::now(),
        };

        if let Err(e) = self.record_result(&result).await {
            // The final answer is only committed together with the result.
            let QuizResult {
                quiz, mut answers, ..
            } = result;
            answers.pop();
            self.state = QuizState::InProgress { quiz, answers };
            return Err(e);
        }

        self.state = QuizState::Completed(result.clone());
        Ok(Some(result))
    }

    async fn record_result(&self, result: &QuizResult) -> Result<(), QuizError> {
        let mut session = self.load_session().await?;
        session.quiz_results.push(result.clone());
        self.sessions.upsert(session).await?;
        info!(
            "Recorded quiz result {}/{} for session {}",
            result.score, result.total_questions, self.session_id
        );
        Ok(())
    }

    /// Starts a fresh attempt of the quiz that was just completed.
    pub fn retake(&mut self) -> Result<(), QuizError> {
        match std::mem::replace(&mut self.state, QuizState::Idle) {
            QuizState::Completed(result) => {
                self.state = QuizState::Ready(result.quiz);
                Ok(())
            }
            other => {
                let state = other.name();
                self.state = other;
                Err(QuizError::InvalidState {
                    action: "retake",
                    state,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{get_or_create_session, NewSession};
    use crate::test_support::{MemoryRepository, ScriptedBackend};

    fn quiz_reply(count: usize) -> String {
        let questions: Vec<String> = (0..count)
            .map(|i| {
                format!(
                    r#"{{"question": "Q{i}", "options": ["right{i}", "w1", "w2", "w3"], "correctAnswer": 0, "explanation": ""}}"#
                )
            })
            .collect();
        format!("[{}]", questions.join(","))
    }

    async fn engine_with(reply: String) -> (QuizEngine, Arc<MemoryRepository>, Arc<ScriptedBackend>) {
        let repo = Arc::new(MemoryRepository::default());
        let session = get_or_create_session(
            repo.as_ref(),
            NewSession {
                video_id: "vid".into(),
                video_url: "https://youtu.be/vid".into(),
                title: "Lecture".into(),
                thumbnail_url: None,
                transcript: "transcript".into(),
            },
        )
        .await
        .unwrap();
        let backend = Arc::new(ScriptedBackend::replying(&reply));
        let engine = QuizEngine::new(
            ProviderGateway::new(backend.clone()),
            repo.clone(),
            session.id,
        );
        (engine, repo, backend)
    }

    fn correct_choice(engine: &QuizEngine) -> Option<usize> {
        engine.current_question().map(|q| q.correct_answer)
    }

    #[tokio::test]
    async fn all_correct_answers_score_full_marks() {
        let (mut engine, repo, _) = engine_with(quiz_reply(5)).await;
        engine.generate(5, "m").await.unwrap();

        let mut result = None;
        for _ in 0..5 {
            let choice = correct_choice(&engine);
            result = engine.answer(choice).await.unwrap();
        }

        let result = result.unwrap();
        assert_eq!(result.score, 5);
        assert_eq!(result.total_questions, 5);
        assert!(matches!(engine.state(), QuizState::Completed(_)));
        let stored = repo.get_by_id(engine.session_id()).await.unwrap().unwrap();
        assert_eq!(stored.quiz_results, vec![result]);
    }

    #[tokio::test]
    async fn unanswered_questions_never_count() {
        let (mut engine, _, _) = engine_with(quiz_reply(3)).await;
        engine.generate(3, "m").await.unwrap();

        let first = correct_choice(&engine);
        assert!(engine.answer(first).await.unwrap().is_none());
        assert!(matches!(engine.state(), QuizState::InProgress { .. }));
        engine.answer(None).await.unwrap();
        let result = engine.answer(None).await.unwrap().unwrap();

        assert_eq!(result.score, 1);
        assert_eq!(result.answers.len(), 3);
        assert_eq!(result.answers[1], None);
    }

    #[tokio::test]
    async fn out_of_range_choice_does_not_consume_the_question() {
        let (mut engine, _, _) = engine_with(quiz_reply(2)).await;
        engine.generate(2, "m").await.unwrap();

        let error = engine.answer(Some(9)).await.unwrap_err();
        assert!(matches!(error, QuizError::InvalidOption { question: 1, choice: 9 }));
        assert!(matches!(engine.state(), QuizState::Ready(_)));
        assert_eq!(engine.current_question().unwrap().id, 1);
    }

    #[tokio::test]
    async fn generation_failure_returns_to_idle() {
        let (mut engine, repo, backend) = engine_with(quiz_reply(2)).await;
        backend.set_reply(Err(GatewayError::timeout()));

        let error = engine.generate(2, "m").await.unwrap_err();

        assert!(matches!(error, QuizError::Gateway(GatewayError::Timeout(_))));
        assert_eq!(engine.state(), &QuizState::Idle);
        let stored = repo.get_by_id(engine.session_id()).await.unwrap().unwrap();
        assert!(stored.latest_quiz.is_none());
    }

    #[tokio::test]
    async fn regeneration_bumps_the_version_past_history() {
        let (mut engine, repo, _) = engine_with(quiz_reply(1)).await;

        assert_eq!(engine.generate(1, "m").await.unwrap().version, 1);
        let choice = correct_choice(&engine);
        engine.answer(choice).await.unwrap();
        assert_eq!(engine.generate(1, "m").await.unwrap().version, 2);
        assert_eq!(engine.generate(1, "m").await.unwrap().version, 3);

        let stored = repo.get_by_id(engine.session_id()).await.unwrap().unwrap();
        assert_eq!(stored.latest_quiz.unwrap().version, 3);
        assert_eq!(stored.quiz_results[0].quiz.version, 1);
    }

    #[tokio::test]
    async fn answering_before_generation_is_rejected() {
        let (mut engine, _, _) = engine_with(quiz_reply(1)).await;
        let error = engine.answer(Some(0)).await.unwrap_err();
        assert!(matches!(error, QuizError::InvalidState { state: "idle", .. }));
    }

    #[tokio::test]
    async fn cannot_regenerate_mid_attempt() {
        let (mut engine, _, backend) = engine_with(quiz_reply(2)).await;
        engine.generate(2, "m").await.unwrap();
        engine.answer(None).await.unwrap();

        assert!(engine.generate(2, "m").await.is_err());
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn retake_restarts_the_same_quiz_and_keeps_history() {
        let (mut engine, repo, _) = engine_with(quiz_reply(1)).await;
        engine.generate(1, "m").await.unwrap();
        engine.answer(None).await.unwrap();

        engine.retake().unwrap();
        assert!(matches!(engine.state(), QuizState::Ready(_)));
        let choice = correct_choice(&engine);
        let second = engine.answer(choice).await.unwrap().unwrap();

        assert_eq!(second.score, 1);
        let stored = repo.get_by_id(engine.session_id()).await.unwrap().unwrap();
        assert_eq!(stored.quiz_results.len(), 2);
        assert_eq!(stored.quiz_results[0].score, 0);
    }

    #[tokio::test]
    async fn open_resumes_the_latest_quiz() {
        let (mut engine, repo, backend) = engine_with(quiz_reply(2)).await;
        engine.generate(2, "m").await.unwrap();

        let reopened = QuizEngine::open(
            ProviderGateway::new(backend),
            repo.clone(),
            engine.session_id().to_string(),
        )
        .await
        .unwrap();

        assert!(matches!(reopened.state(), QuizState::Ready(q) if q.questions.len() == 2));
    }

    #[test]
    fn next_version_starts_at_one() {
        let session = VideoSession {
            id: "s".into(),
            video_id: "v".into(),
            video_url: "u".into(),
            title: "t".into(),
            thumbnail_url: "th".into(),
            transcript: "tr".into(),
            created_at: Utc::now(),
            quiz_results: vec![],
            study_materials: Default::default(),
            latest_quiz: None,
        };
        assert_eq!(next_version(&session), 1);
    }
}
