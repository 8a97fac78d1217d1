//! Fence-tolerant decoding of free-form model replies.
//!
//! Models wrap JSON in markdown fences and sometimes nest the payload under a
//! named field. Each payload type is an untagged enum whose variant order is
//! the fallback order: the wrapped object first, then the bare value.

use crate::domain::{Flashcard, MindMapNode, QuizQuestion};
use crate::ports::{GatewayError, GatewayResult};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Number of answer options every quiz question must have.
pub const OPTIONS_PER_QUESTION: usize = 4;

//=========================================================================================
// Fence Handling
//=========================================================================================

/// Removes a markdown fence that wraps the entire reply. Inner fences are kept.
pub fn strip_wrapping_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string, e.g. ```markdown
    let body = match inner.find('\n') {
        Some(newline) if !inner[..newline].contains(char::is_whitespace) => &inner[newline + 1..],
        _ => inner,
    };
    body.trim().to_string()
}

/// The body of a fence that opens the reply, or `None` when the reply does not
/// start with one. A missing closing fence is tolerated.
fn leading_fence_body(trimmed: &str) -> Option<&str> {
    let after = trimmed.strip_prefix("```")?;
    let tag_end = after
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after.len());
    let body = &after[tag_end..];
    let body = match body.rfind("```") {
        Some(end) => &body[..end],
        None => body,
    };
    Some(body.trim())
}

/// Candidate JSON texts of a reply, most literal first.
///
/// The reply as-is, then the body of a fence opening the reply, then the span
/// from the first `[`/`{` to the last `]`/`}`.
pub fn json_candidates(raw: &str) -> Vec<&str> {
    let trimmed = raw.trim();
    let mut candidates = vec![trimmed];

    if let Some(body) = leading_fence_body(trimmed) {
        candidates.push(body);
    }

    let start = trimmed.find(['[', '{']);
    let end = trimmed.rfind([']', '}']);
    if let (Some(start), Some(end)) = (start, end) {
        if end > start {
            candidates.push(&trimmed[start..=end]);
        }
    }
    candidates.dedup();
    candidates
}

/// Decodes a reply into `T`, mapping any failure to `InvalidResponse`.
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> GatewayResult<T> {
    let mut last_error = None;
    for candidate in json_candidates(raw) {
        match serde_json::from_str(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e),
        }
    }
    match last_error {
        Some(e) => warn!("Failed to decode model reply as JSON: {}", e),
        None => warn!("Model reply contained no JSON"),
    }
    Err(GatewayError::invalid_response())
}

//=========================================================================================
// Payload Shapes
//=========================================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestion {
    question: String,
    options: Vec<String>,
    #[serde(alias = "correct_answer", alias = "answer")]
    correct_answer: usize,
    #[serde(default)]
    explanation: String,
}

/// Items stay untyped so one malformed question cannot sink the rest.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuestionsPayload {
    Wrapped { questions: Vec<Value> },
    Bare(Vec<Value>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlashcardsPayload {
    Wrapped { flashcards: Vec<Flashcard> },
    Bare(Vec<Flashcard>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MindMapPayload {
    Wrapped {
        #[serde(rename = "mindMap", alias = "mindmap", alias = "mind_map")]
        mind_map: MindMapNode,
    },
    Rooted {
        root: MindMapNode,
    },
    Bare(MindMapNode),
}

//=========================================================================================
// Public Parsers
//=========================================================================================

/// Parses quiz questions, numbers them from 1 and shuffles each question's options.
///
/// Questions without exactly four options or with an out-of-range answer are
/// dropped. At most `limit` questions are kept.
pub fn parse_quiz_questions<R: Rng + ?Sized>(
    raw: &str,
    limit: usize,
    rng: &mut R,
) -> GatewayResult<Vec<QuizQuestion>> {
    let raw_questions = match decode_json::<QuestionsPayload>(raw)? {
        QuestionsPayload::Wrapped { questions } => questions,
        QuestionsPayload::Bare(questions) => questions,
    };

    let received = raw_questions.len();
    let mut questions: Vec<QuizQuestion> = raw_questions
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawQuestion>(item) {
            Ok(question) => Some(question),
            Err(e) => {
                warn!("Skipping undecodable quiz question: {}", e);
                None
            }
        })
        .filter(|q| {
            q.options.len() == OPTIONS_PER_QUESTION && q.correct_answer < OPTIONS_PER_QUESTION
        })
        .take(limit)
        .enumerate()
        .map(|(index, q)| QuizQuestion {
            id: index as u32 + 1,
            question: q.question,
            options: q.options,
            correct_answer: q.correct_answer,
            explanation: q.explanation,
        })
        .collect();

    if questions.len() < received.min(limit) {
        warn!(
            "Dropped {} malformed quiz question(s)",
            received.min(limit) - questions.len()
        );
    }
    if questions.is_empty() {
        return Err(GatewayError::invalid_response());
    }

    for question in &mut questions {
        shuffle_options(question, rng);
    }
    Ok(questions)
}

pub fn parse_flashcards(raw: &str) -> GatewayResult<Vec<Flashcard>> {
    Ok(match decode_json::<FlashcardsPayload>(raw)? {
        FlashcardsPayload::Wrapped { flashcards } => flashcards,
        FlashcardsPayload::Bare(flashcards) => flashcards,
    })
}

pub fn parse_mind_map(raw: &str) -> GatewayResult<MindMapNode> {
    Ok(match decode_json::<MindMapPayload>(raw)? {
        MindMapPayload::Wrapped { mind_map } => mind_map,
        MindMapPayload::Rooted { root } => root,
        MindMapPayload::Bare(node) => node,
    })
}

//=========================================================================================
// Shuffling
//=========================================================================================

/// Fisher-Yates shuffle of the options that keeps `correct_answer` pointing at
/// the same option text.
pub fn shuffle_options<R: Rng + ?Sized>(question: &mut QuizQuestion, rng: &mut R) {
    let mut correct = question.correct_answer;
    for i in (1..question.options.len()).rev() {
        let j = rng.random_range(0..=i);
        question.options.swap(i, j);
        if correct == i {
            correct = j;
        } else if correct == j {
            correct = i;
        }
    }
    question.correct_answer = correct;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const QUESTIONS: &str = r#"[
        {"question": "Capital of France?", "options": ["Paris", "Rome", "Berlin", "Madrid"], "correctAnswer": 0, "explanation": "Paris."},
        {"question": "2 + 2?", "options": ["3", "4", "5", "6"], "correctAnswer": 1, "explanation": "Four."},
        {"question": "Largest planet?", "options": ["Mars", "Venus", "Earth", "Jupiter"], "correctAnswer": 3, "explanation": "Jupiter."}
    ]"#;

    #[test]
    fn shuffle_keeps_the_correct_option_text_for_every_seed() {
        let template = QuizQuestion {
            id: 1,
            question: "Pick C".into(),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            correct_answer: 2,
            explanation: String::new(),
        };
        for seed in 0..500 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut question = template.clone();
            shuffle_options(&mut question, &mut rng);

            assert_eq!(question.correct_option(), Some("C"), "seed {}", seed);
            let mut sorted = question.options.clone();
            sorted.sort();
            assert_eq!(sorted, template.options);
        }
    }

    #[test]
    fn shuffle_actually_reorders_options_for_some_seed() {
        let moved = (0..50).any(|seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut question = QuizQuestion {
                id: 1,
                question: "q".into(),
                options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                correct_answer: 0,
                explanation: String::new(),
            };
            shuffle_options(&mut question, &mut rng);
            question.correct_answer != 0
        });
        assert!(moved);
    }

    #[test]
    fn parses_fenced_wrapped_questions_and_numbers_them() {
        let raw = format!("```json\n{{\"questions\": {}}}\n```", QUESTIONS);
        let mut rng = StdRng::seed_from_u64(7);
        let questions = parse_quiz_questions(&raw, 10, &mut rng).unwrap();

        assert_eq!(questions.len(), 3);
        assert_eq!(
            questions.iter().map(|q| q.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(questions[0].correct_option(), Some("Paris"));
        assert_eq!(questions[1].correct_option(), Some("4"));
        assert_eq!(questions[2].correct_option(), Some("Jupiter"));
    }

    #[test]
    fn parses_bare_array_and_respects_limit() {
        let mut rng = StdRng::seed_from_u64(1);
        let questions = parse_quiz_questions(QUESTIONS, 2, &mut rng).unwrap();
        assert_eq!(questions.len(), 2);
    }

    #[test]
    fn drops_questions_without_four_options() {
        let raw = r#"[
            {"question": "bad", "options": ["a", "b"], "correctAnswer": 0},
            {"question": "good", "options": ["a", "b", "c", "d"], "correctAnswer": 2}
        ]"#;
        let mut rng = StdRng::seed_from_u64(3);
        let questions = parse_quiz_questions(raw, 10, &mut rng).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].id, 1);
        assert_eq!(questions[0].question, "good");
    }

    #[test]
    fn malformed_json_is_an_invalid_response() {
        let mut rng = StdRng::seed_from_u64(3);
        let error = parse_quiz_questions("Sorry, I can't help with that.", 10, &mut rng).unwrap_err();
        assert!(matches!(error, GatewayError::InvalidResponse(_)));
    }

    #[test]
    fn json_is_found_after_leading_prose() {
        let values: Vec<u8> = decode_json("Here you go: [1, 2] enjoy").unwrap();
        assert_eq!(values, vec![1, 2]);
        let fenced: Value = decode_json("```\n{\"a\":1}\n```").unwrap();
        assert_eq!(fenced["a"], 1);
        let introduced: Value = decode_json("Sure:\n```json\n{\"a\":2}\n```").unwrap();
        assert_eq!(introduced["a"], 2);
    }

    #[test]
    fn backticks_inside_unfenced_json_strings_are_kept() {
        let raw = r###"{"questions": [
            {"question": "Which token opens a fenced code block?", "options": ["```", "~~", "##", "**"], "correctAnswer": 0, "explanation": "Three backticks."},
            {"question": "Inline code uses?", "options": ["`", "_", "*", "#"], "correctAnswer": 0}
        ]}"###;
        let mut rng = StdRng::seed_from_u64(11);
        let questions = parse_quiz_questions(raw, 10, &mut rng).unwrap();

        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].correct_option(), Some("```"));
        assert_eq!(questions[1].correct_option(), Some("`"));
    }

    #[test]
    fn fenced_json_with_backticks_in_strings_is_decoded() {
        let raw = "```json\n[{\"question\": \"Fence?\", \"options\": [\"```\", \"a\", \"b\", \"c\"], \"correctAnswer\": 0}]\n```";
        let mut rng = StdRng::seed_from_u64(2);
        let questions = parse_quiz_questions(raw, 10, &mut rng).unwrap();
        assert_eq!(questions[0].correct_option(), Some("```"));
    }

    #[test]
    fn undecodable_questions_are_skipped_individually() {
        let raw = r#"[
            {"question": "null answer", "options": ["a", "b", "c", "d"], "correctAnswer": null},
            {"question": "negative", "options": ["a", "b", "c", "d"], "correctAnswer": -1},
            {"question": "letter", "options": ["a", "b", "c", "d"], "correctAnswer": "B"},
            {"question": "no options", "correctAnswer": 1},
            {"question": "good", "options": ["a", "b", "c", "d"], "correctAnswer": 2}
        ]"#;
        let mut rng = StdRng::seed_from_u64(5);
        let questions = parse_quiz_questions(raw, 10, &mut rng).unwrap();

        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].id, 1);
        assert_eq!(questions[0].question, "good");
        assert_eq!(questions[0].correct_option(), Some("c"));
    }

    #[test]
    fn wrapping_fence_is_removed_but_inner_fences_survive() {
        assert_eq!(strip_wrapping_fence("```markdown\n# Title\n```"), "# Title");
        let inner = "Intro\n```rust\nfn main() {}\n```\nOutro";
        assert_eq!(strip_wrapping_fence(inner), inner);
    }

    #[test]
    fn flashcards_accept_both_shapes() {
        let bare = r#"[{"front": "Q1", "back": "A1"}]"#;
        let wrapped = r#"{"flashcards": [{"front": "Q1", "back": "A1"}, {"front": "Q2", "back": "A2"}]}"#;
        assert_eq!(parse_flashcards(bare).unwrap().len(), 1);
        assert_eq!(parse_flashcards(wrapped).unwrap().len(), 2);
    }

    #[test]
    fn mind_map_accepts_wrapped_and_bare_nodes() {
        let wrapped = r#"{"mindMap": {"label": "Rust", "children": [{"label": "Ownership"}]}}"#;
        let bare = r#"{"label": "Rust", "children": []}"#;
        let wrapped = parse_mind_map(wrapped).unwrap();
        assert_eq!(wrapped.label, "Rust");
        assert_eq!(wrapped.children[0].label, "Ownership");
        assert!(wrapped.children[0].children.is_empty());
        assert_eq!(parse_mind_map(bare).unwrap().label, "Rust");
    }
}
