//! Aggregation of a full event stream into one persistable message.
//!
//! The chat layer relays events to the client as they arrive, but the
//! message row written at the end of the stream needs the assembled
//! content plus everything structured that was extracted along the way.
//! `MessageCollector` is that bookkeeping.

use serde::Serialize;

use crate::events::{ActionSuggestion, EntityDraft, ParseError, RichMessage, StreamEvent};
use crate::steps::ThinkingStep;

#[derive(Debug, Default)]
pub struct MessageCollector {
    content: String,
    thinking_steps: Vec<ThinkingStep>,
    entities: Vec<EntityDraft>,
    actions: Vec<ActionSuggestion>,
    rich_messages: Vec<RichMessage>,
    errors: Vec<ParseError>,
}

impl MessageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event. Text concatenates; everything else appends to its
    /// per-kind list in arrival order.
    pub fn push(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Text { text } => self.content.push_str(&text),
            StreamEvent::Thinking { step } => self.thinking_steps.push(step),
            StreamEvent::Entity { entity } => self.entities.push(entity),
            StreamEvent::Action { action } => self.actions.push(action),
            StreamEvent::RichMessage { message } => self.rich_messages.push(message),
            StreamEvent::Error { error } => self.errors.push(error),
        }
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = StreamEvent>) {
        for event in events {
            self.push(event);
        }
    }

    /// Seal the collected stream into a message record.
    pub fn finish(self) -> CompletedMessage {
        CompletedMessage {
            content: self.content,
            thinking_steps: self.thinking_steps,
            entities: self.entities,
            actions: self.actions,
            rich_messages: self.rich_messages,
            errors: self.errors,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// One fully-streamed assistant message, ready for the persistence layer.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedMessage {
    pub content: String,
    pub thinking_steps: Vec<ThinkingStep>,
    pub entities: Vec<EntityDraft>,
    pub actions: Vec<ActionSuggestion>,
    pub rich_messages: Vec<RichMessage>,
    pub errors: Vec<ParseError>,
    /// RFC3339 timestamp of stream completion.
    pub created_at: String,
}

impl CompletedMessage {
    /// Serialize for the message store.
    pub fn into_json(self) -> atelier_core::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::BlockParser;

    #[test]
    fn collects_a_mixed_stream() {
        let mut parser = BlockParser::new();
        let mut collector = MessageCollector::new();

        collector.extend(parser.feed(
            "Here you go. <CREATE_ENTITY type=\"page\">{\"name\":\"Home\"}</CREATE_ENTITY>",
        ));
        collector.extend(parser.feed("<ACTION type=\"open\" label=\"Open it\"/> Enjoy!"));
        collector.extend(parser.flush());

        let message = collector.finish();
        assert_eq!(message.content, "Here you go.  Enjoy!");
        assert_eq!(message.entities.len(), 1);
        assert_eq!(message.entities[0].entity_type, "page");
        assert_eq!(message.actions.len(), 1);
        assert_eq!(message.actions[0].label, "Open it");
        assert!(message.thinking_steps.is_empty());
        assert!(message.errors.is_empty());
        assert!(!message.created_at.is_empty());
    }

    #[test]
    fn parse_errors_are_kept_alongside_content() {
        let mut parser = BlockParser::new();
        let mut collector = MessageCollector::new();

        collector.extend(parser.feed(
            "before <CREATE_ENTITY type=\"page\">{oops</CREATE_ENTITY> after",
        ));
        collector.extend(parser.flush());

        let message = collector.finish();
        assert_eq!(message.content, "before  after");
        assert!(message.entities.is_empty());
        assert_eq!(message.errors.len(), 1);
        assert_eq!(message.errors[0].code(), "INVALID_ENTITY_PAYLOAD");
    }

    #[test]
    fn into_json_has_the_store_shape() {
        let mut collector = MessageCollector::new();
        collector.push(StreamEvent::Text {
            text: "hi".to_string(),
        });
        let value = collector.finish().into_json().unwrap();

        assert_eq!(value["content"], "hi");
        assert!(value["thinking_steps"].as_array().unwrap().is_empty());
        assert!(value["created_at"].as_str().is_some());
    }
}
