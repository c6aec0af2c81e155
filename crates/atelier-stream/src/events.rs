use serde::Serialize;
use thiserror::Error;

use crate::steps::ThinkingStep;

/// Events emitted while parsing an LLM response stream.
///
/// One event is emitted per recognized unit, in buffer order, exactly once.
/// Callers decide what to do with each kind — persist it, relay it to the
/// client over the server-push wire, or both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Plain prose outside any structured block.
    Text { text: String },

    /// One reasoning step from a `<thinking>` block.
    Thinking { step: ThinkingStep },

    /// A structured object from a `<CREATE_ENTITY>` block.
    Entity { entity: EntityDraft },

    /// An inline `<ACTION .../>` suggestion.
    Action { action: ActionSuggestion },

    /// A `<RICH_MESSAGE>` interaction block.
    RichMessage { message: RichMessage },

    /// A tolerated parse failure — the offending block was consumed and
    /// the stream continues.
    Error { error: ParseError },
}

impl StreamEvent {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Text { .. } => "text",
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::Entity { .. } => "entity",
            StreamEvent::Action { .. } => "action",
            StreamEvent::RichMessage { .. } => "rich_message",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error { .. })
    }
}

/// An entity the model asked to create, with a freshly generated id.
/// The caller owns persistence — the parser keeps no copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDraft {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub data: serde_json::Value,
    pub id: String,
}

/// An action the model suggested the user take next.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSuggestion {
    #[serde(rename = "type")]
    pub action_type: String,
    pub label: String,
    pub data: serde_json::Value,
}

/// A rich interaction block (selection, comparison, form, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RichMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub content: serde_json::Value,
}

/// In-band parse failures. These never abort the stream — the block that
/// failed is discarded and parsing resumes after it.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseError {
    /// The body of a `<CREATE_ENTITY>` block was not valid JSON.
    #[error("invalid entity payload for type {entity_type}")]
    InvalidEntityPayload { entity_type: String },

    /// The body of a `<RICH_MESSAGE>` block was not valid JSON.
    #[error("invalid rich message payload for type {message_type}")]
    InvalidRichMessagePayload { message_type: String },
}

impl ParseError {
    /// Short error code string sent to clients in server-push frames.
    pub fn code(&self) -> &'static str {
        match self {
            ParseError::InvalidEntityPayload { .. } => "INVALID_ENTITY_PAYLOAD",
            ParseError::InvalidRichMessagePayload { .. } => "INVALID_RICH_MESSAGE_PAYLOAD",
        }
    }
}
