//! Incremental parsing of streamed LLM responses into typed events.

pub mod collect;
pub mod events;
pub mod parser;
pub mod relay;
pub mod steps;

pub use collect::{CompletedMessage, MessageCollector};
pub use events::{ActionSuggestion, EntityDraft, ParseError, RichMessage, StreamEvent};
pub use parser::{strip_blocks, BlockParser};
pub use relay::relay_stream;
pub use steps::{StepKind, ThinkingStep};
