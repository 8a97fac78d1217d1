//! Translation of heterogeneous backend failures into `GatewayError`.
//!
//! Backends report failures as HTTP statuses, JSON error envelopes or plain
//! strings. Classification tries those in that order and falls back to
//! `Unknown`.

use crate::ports::GatewayError;
use serde::Deserialize;

const MAX_DETAIL_CHARS: usize = 200;

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl GatewayError {
    pub fn auth() -> Self {
        Self::Auth("Invalid or missing API key. Please check your settings.".to_string())
    }

    pub fn rate_limited() -> Self {
        Self::RateLimited("Rate limit reached. Please wait a moment and try again.".to_string())
    }

    pub fn permission_denied() -> Self {
        Self::PermissionDenied("Your API key does not have access to this model.".to_string())
    }

    pub fn not_found() -> Self {
        Self::NotFound(
            "The selected model was not found. Try choosing a different model.".to_string(),
        )
    }

    pub fn server() -> Self {
        Self::Server("The AI service is having trouble right now. Please try again later.".to_string())
    }

    pub fn timeout() -> Self {
        Self::Timeout("The request timed out. Please try again.".to_string())
    }

    pub fn network() -> Self {
        Self::Network("Network error. Check your internet connection and try again.".to_string())
    }

    pub fn invalid_response() -> Self {
        Self::InvalidResponse("The AI returned an unexpected response. Please try again.".to_string())
    }

    pub fn unknown(detail: &str) -> Self {
        let detail: String = detail.trim().chars().take(MAX_DETAIL_CHARS).collect();
        if detail.is_empty() {
            Self::Unknown("Something went wrong while contacting the AI service.".to_string())
        } else {
            Self::Unknown(format!("Something went wrong: {}", detail))
        }
    }

    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth_error",
            Self::RateLimited(_) => "rate_limited",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::Server(_) => "server_error",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network_error",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Unknown(_) => "unknown",
        }
    }

    /// The user-facing message.
    pub fn message(&self) -> &str {
        match self {
            Self::Auth(m)
            | Self::RateLimited(m)
            | Self::PermissionDenied(m)
            | Self::NotFound(m)
            | Self::Server(m)
            | Self::Timeout(m)
            | Self::Network(m)
            | Self::InvalidResponse(m)
            | Self::Unknown(m) => m,
        }
    }

    /// Maps an HTTP status code. Returns `None` for codes without a dedicated variant.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(Self::auth()),
            403 => Some(Self::permission_denied()),
            404 => Some(Self::not_found()),
            408 | 504 => Some(Self::timeout()),
            429 => Some(Self::rate_limited()),
            500..=599 => Some(Self::server()),
            _ => None,
        }
    }

    /// Classifies a failed HTTP exchange from its status and body.
    pub fn from_response(status: u16, body: &str) -> Self {
        Self::from_status(status).unwrap_or_else(|| Self::classify(body))
    }

    /// Maps a symbolic error name such as `rate_limit_exceeded` or `RESOURCE_EXHAUSTED`.
    pub fn from_symbol(name: &str, message: Option<&str>) -> Option<Self> {
        classify_symbol(name, message)
    }

    /// Classifies raw error text: JSON envelope, then status codes, then phrases.
    pub fn classify(raw: &str) -> Self {
        if let Some(error) = classify_envelope(raw) {
            return error;
        }
        if let Some(error) = classify_status_tokens(raw) {
            return error;
        }
        classify_phrases(raw).unwrap_or_else(|| Self::unknown(raw))
    }
}

fn parse_envelope(raw: &str) -> Option<ErrorBody> {
    let trimmed = raw.trim();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(trimmed) {
        return Some(envelope.error);
    }
    // SDKs often prefix the body, e.g. "status 429: {...}".
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<ErrorEnvelope>(&trimmed[start..=end])
        .ok()
        .map(|e| e.error)
}

fn classify_envelope(raw: &str) -> Option<GatewayError> {
    let body = parse_envelope(raw)?;

    let numeric_code = body.code.as_ref().and_then(|code| match code {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_json::Value::String(s) => s.parse::<u16>().ok(),
        _ => None,
    });
    if let Some(error) = numeric_code.and_then(GatewayError::from_status) {
        return Some(error);
    }

    let symbolic = [
        body.status.as_deref(),
        body.code.as_ref().and_then(|c| c.as_str()),
        body.kind.as_deref(),
    ];
    for name in symbolic.into_iter().flatten() {
        if let Some(error) = classify_symbol(name, body.message.as_deref()) {
            return Some(error);
        }
    }

    body.message.as_deref().and_then(classify_phrases)
}

fn classify_symbol(name: &str, message: Option<&str>) -> Option<GatewayError> {
    match name.to_ascii_uppercase().as_str() {
        "UNAUTHENTICATED" | "INVALID_API_KEY" | "API_KEY_INVALID" | "AUTHENTICATION_ERROR" => {
            Some(GatewayError::auth())
        }
        "RESOURCE_EXHAUSTED" | "RATE_LIMIT_EXCEEDED" | "INSUFFICIENT_QUOTA" | "RATE_LIMIT_ERROR" => {
            Some(GatewayError::rate_limited())
        }
        "PERMISSION_DENIED" | "PERMISSION_ERROR" => Some(GatewayError::permission_denied()),
        "NOT_FOUND" | "MODEL_NOT_FOUND" | "NOT_FOUND_ERROR" => Some(GatewayError::not_found()),
        "DEADLINE_EXCEEDED" => Some(GatewayError::timeout()),
        "UNAVAILABLE" | "INTERNAL" | "SERVER_ERROR" | "OVERLOADED_ERROR" => {
            Some(GatewayError::server())
        }
        // Gemini reports a bad key as INVALID_ARGUMENT with an explanatory message.
        "INVALID_ARGUMENT" => message
            .filter(|m| m.to_ascii_lowercase().contains("api key"))
            .map(|_| GatewayError::auth()),
        _ => None,
    }
}

fn classify_status_tokens(raw: &str) -> Option<GatewayError> {
    raw.split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find_map(GatewayError::from_status)
}

fn classify_phrases(raw: &str) -> Option<GatewayError> {
    const TABLE: &[(&[&str], fn() -> GatewayError)] = &[
        (
            &[
                "api key not valid",
                "invalid api key",
                "incorrect api key",
                "invalid_api_key",
                "api_key_invalid",
                "unauthenticated",
                "unauthorized",
                "invalid authentication",
            ],
            GatewayError::auth,
        ),
        (
            &[
                "rate limit",
                "rate_limit",
                "quota",
                "resource_exhausted",
                "too many requests",
            ],
            GatewayError::rate_limited,
        ),
        (
            &["permission_denied", "permission denied", "forbidden"],
            GatewayError::permission_denied,
        ),
        (
            &["not found", "not_found", "does not exist"],
            GatewayError::not_found,
        ),
        (
            &["timed out", "timeout", "deadline_exceeded", "deadline exceeded"],
            GatewayError::timeout,
        ),
        (
            &[
                "internal server error",
                "server error",
                "server_error",
                "overloaded",
                "unavailable",
                "bad gateway",
            ],
            GatewayError::server,
        ),
        (
            &[
                "network",
                "connection",
                "dns",
                "failed to fetch",
                "error sending request",
                "econnrefused",
            ],
            GatewayError::network,
        ),
    ];

    let lowered = raw.to_ascii_lowercase();
    TABLE
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| lowered.contains(needle)))
        .map(|(_, build)| build())
}
