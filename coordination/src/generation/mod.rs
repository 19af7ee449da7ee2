//! Response text generation
//!
//! The generator is an opaque async collaborator: it receives a
//! [`GenerationRequest`] and returns text or fails. Everything around that
//! call (bounded retries, per-attempt timeouts, length capping, prompt
//! construction) lives here so agents and the moderator share one policy.

pub mod openai;
pub mod prompt;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::Stance;

pub use openai::OpenAiCompatGenerator;
pub use retry::{generate_with_retry, RetryPolicy};

/// Errors from a generation call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    RequestFailed(String),

    #[error("Generator returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generator returned empty text")]
    Empty,

    #[error("Generation cancelled")]
    Cancelled,

    #[error("All {attempts} attempts failed; last error: {last}")]
    Exhausted { attempts: u32, last: Box<GenerationError> },
}

/// Result type for generation calls
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Why the text is being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Opening,
    Response,
    Closing,
    Autonomous,
    SilenceBreak,
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::Response => write!(f, "response"),
            Self::Closing => write!(f, "closing"),
            Self::Autonomous => write!(f, "autonomous"),
            Self::SilenceBreak => write!(f, "silence_break"),
        }
    }
}

/// Everything a generator needs to produce one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub speaker: String,
    pub topic: String,
    pub stance: Stance,
    pub personality: String,
    pub burning_questions: Vec<String>,
    /// Rendered `author: body` lines, oldest first.
    pub context: Vec<String>,
    pub purpose: Purpose,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Produces statement text for a participant.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<String>;
}

/// Trim `text` to at most `max_chars` characters, cutting on a word boundary
/// and appending an ellipsis. Returns the text and whether it was cut.
pub fn truncate_on_word(text: &str, max_chars: usize) -> (String, bool) {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }

    let budget = max_chars.saturating_sub(3);
    let cut: String = text.chars().take(budget).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => cut[..idx].trim_end(),
        _ => cut.as_str(),
    };
    (format!("{}...", trimmed), true)
}
