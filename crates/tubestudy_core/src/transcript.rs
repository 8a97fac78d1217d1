//! Helpers for the plain-text transcript handed over by the transcript source.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    /// Seconds.
    pub duration: f64,
    /// Seconds from the start of the video.
    pub offset: f64,
    pub lang: String,
}

pub fn decode_xml_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Joins segment texts into one transcript string, skipping empty segments.
pub fn assemble_transcript(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| decode_xml_entities(s.text.trim()))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn video_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?:[?&]v=|youtu\.be/|/embed/|/shorts/|/live/)([A-Za-z0-9_-]{11})").ok()
        })
        .as_ref()
}

/// Extracts the 11-character video id from a watch, short-link, embed or shorts URL.
/// A bare id is returned as-is.
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    let is_id = |s: &str| {
        s.len() == 11
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    };
    if is_id(input) {
        return Some(input.to_string());
    }
    video_id_pattern()?
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn thumbnail_url(video_id: &str) -> String {
    format!("https://img.youtube.com/vi/{}/hqdefault.jpg", video_id)
}
