//! Prompt text shared by every backend.

use crate::domain::MaterialType;

/// Longest transcript prefix sent to a backend, in characters.
pub const MAX_TRANSCRIPT_CHARS: usize = 15_000;

pub const TRUNCATION_MARKER: &str = "\n\n[Transcript truncated]";

/// Returns the transcript prefix that fits the prompt budget, with a marker
/// appended when anything was cut.
pub fn truncate_transcript(transcript: &str) -> String {
    match transcript.char_indices().nth(MAX_TRANSCRIPT_CHARS) {
        Some((cut, _)) => format!("{}{}", &transcript[..cut], TRUNCATION_MARKER),
        None => transcript.to_string(),
    }
}

pub const QUIZ_SYSTEM_PROMPT: &str = r#"You are an expert educator who writes multiple-choice quizzes from video transcripts.

Rules:
- Every question tests understanding of the transcript, not trivia about the speaker.
- Every question has EXACTLY 4 options. Exactly one option is correct.
- "correctAnswer" is the zero-based index of the correct option.
- "explanation" is one or two sentences explaining why the answer is correct.
- Output ONLY valid JSON, no markdown and no commentary."#;

pub fn quiz_user_prompt(transcript: &str, count: usize) -> String {
    format!(
        r#"Create {count} multiple-choice questions from this transcript.

Return JSON in this exact shape:
{{
  "questions": [
    {{
      "question": "Question text",
      "options": ["Option A", "Option B", "Option C", "Option D"],
      "correctAnswer": 0,
      "explanation": "Why the answer is correct"
    }}
  ]
}}

TRANSCRIPT:
{transcript}"#,
        count = count,
        transcript = truncate_transcript(transcript)
    )
}

const MATERIAL_SYSTEM_PROMPT: &str =
    "You are a study assistant that turns video transcripts into clear learning material.";

pub fn material_system_prompt() -> &'static str {
    MATERIAL_SYSTEM_PROMPT
}

pub fn material_user_prompt(material: MaterialType, transcript: &str) -> String {
    let instructions = match material {
        MaterialType::Summary => {
            "Write a concise summary of the transcript in markdown. Start with a one-paragraph \
             overview, then list the key points as bullets."
        }
        MaterialType::StudyGuide => {
            "Write a study guide in markdown with sections for key concepts, definitions, \
             important details and review questions."
        }
        MaterialType::Roadmap => {
            "Write a learning roadmap in markdown: the prerequisite topics, the order in which to \
             study the material from this video, and suggested next steps after it."
        }
        MaterialType::MindMap => {
            r#"Build a mind map of the transcript. Return ONLY JSON in this shape:
{"mindMap": {"label": "Central topic", "children": [{"label": "Subtopic", "children": [{"label": "Detail", "children": []}]}]}}
Use 3 to 7 subtopics with up to 4 details each."#
        }
        MaterialType::Flashcards => {
            r#"Create 10 to 20 flashcards covering the key facts and concepts. Return ONLY JSON in this shape:
{"flashcards": [{"front": "Question or term", "back": "Answer or definition"}]}"#
        }
    };

    format!(
        "{}\n\nTRANSCRIPT:\n{}",
        instructions,
        truncate_transcript(transcript)
    )
}

pub fn chat_system_prompt(transcript: &str) -> String {
    format!(
        r#"You are a helpful tutor answering questions about a video the user is studying.
Base your answers on the transcript below. If the transcript does not cover the question, say so and answer from general knowledge, making clear which parts are not from the video.
Keep answers focused and use markdown when it helps readability.

TRANSCRIPT:
{}"#,
        truncate_transcript(transcript)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_transcripts_are_untouched() {
        assert_eq!(truncate_transcript("hello"), "hello");
    }

    #[test]
    fn long_transcripts_are_cut_at_the_character_budget() {
        let transcript = "é".repeat(MAX_TRANSCRIPT_CHARS + 10);
        let truncated = truncate_transcript(&transcript);

        assert!(truncated.ends_with(TRUNCATION_MARKER));
        let kept = truncated.trim_end_matches(TRUNCATION_MARKER);
        assert_eq!(kept.chars().count(), MAX_TRANSCRIPT_CHARS);
    }

    #[test]
    fn exact_budget_is_not_marked() {
        let transcript = "a".repeat(MAX_TRANSCRIPT_CHARS);
        assert_eq!(truncate_transcript(&transcript), transcript);
    }
}
