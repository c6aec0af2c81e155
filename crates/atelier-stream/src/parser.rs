//! Incremental block parser for LLM response streams.
//!
//! The model's output interleaves plain prose with four structured
//! mini-languages:
//!
//! ```text
//! <thinking>Step 1: ...</thinking>
//! <CREATE_ENTITY type="page">{ ...JSON... }</CREATE_ENTITY>
//! <ACTION type="navigate" label="Go" data='{"k":"v"}'/>
//! <RICH_MESSAGE type="selection">{ ...JSON... }</RICH_MESSAGE>
//! ```
//!
//! Chunks arrive token by token, so delimiters routinely straddle chunk
//! boundaries. The parser accumulates chunks in one buffer and on every
//! feed emits the earliest complete block (and the prose before it), in
//! buffer order, exactly once each. Text that might still be the prefix of
//! an open block is held back for the next chunk; `flush` releases whatever
//! is left as plain text so a block that never closes cannot swallow output.
//!
//! There is no parser state beyond the buffer and a step counter — each
//! pass re-derives everything from the buffer content, which is cheap at
//! LLM chunk sizes.

use tracing::{debug, warn};
use uuid::Uuid;

use atelier_core::config::StreamConfig;

use crate::events::{ActionSuggestion, EntityDraft, ParseError, RichMessage, StreamEvent};
use crate::steps::split_steps;

const THINKING_OPEN: &str = "<thinking>";
const THINKING_CLOSE: &str = "</thinking>";
const ENTITY_OPEN: &str = "<CREATE_ENTITY";
const ENTITY_CLOSE: &str = "</CREATE_ENTITY>";
const ACTION_OPEN: &str = "<ACTION";
const ACTION_CLOSE: &str = "/>";
const RICH_OPEN: &str = "<RICH_MESSAGE";
const RICH_CLOSE: &str = "</RICH_MESSAGE>";

/// Incremental parser for one LLM response stream.
///
/// One instance per stream; feeds must arrive in order from a single
/// producer. Holds no handles or timers — dropping it is teardown.
pub struct BlockParser {
    buffer: String,
    /// Stream-lifetime counter for thinking blocks without `Step N` markers.
    step_counter: u32,
    max_buffer_bytes: usize,
}

/// A complete block found in the buffer, with owned payload so the
/// buffer can be spliced before emission.
enum Block {
    Thinking {
        inner: String,
    },
    Entity {
        entity_type: String,
        body: String,
    },
    Action {
        action_type: String,
        label: String,
        data: Option<String>,
    },
    RichMessage {
        message_type: String,
        body: String,
    },
}

impl Default for BlockParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockParser {
    pub fn new() -> Self {
        Self::with_config(&StreamConfig::default())
    }

    pub fn with_config(config: &StreamConfig) -> Self {
        Self {
            buffer: String::new(),
            step_counter: 0,
            max_buffer_bytes: config.max_buffer_bytes,
        }
    }

    /// Append one text fragment and return every event it completes,
    /// in emission order. Never blocks.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        self.extract(&mut events);

        // Safety valve: a block that never closes would grow the buffer
        // until the stream ends. Past the cap, give up and emit it as text.
        if self.max_buffer_bytes > 0 && self.buffer.len() > self.max_buffer_bytes {
            warn!(
                buffered = self.buffer.len(),
                cap = self.max_buffer_bytes,
                "parse buffer exceeded cap, force-flushing as text"
            );
            events.push(StreamEvent::Text {
                text: std::mem::take(&mut self.buffer),
            });
        }

        events
    }

    /// Final pass after the last chunk. Any remaining buffer content is
    /// emitted as plain text even if it looks like an unfinished block —
    /// a truncated tag is still worth showing. Safe to call twice; the
    /// second call is a no-op on the empty buffer.
    pub fn flush(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.extract(&mut events);
        if !self.buffer.is_empty() {
            events.push(StreamEvent::Text {
                text: std::mem::take(&mut self.buffer),
            });
        }
        events
    }

    /// One extraction pass: repeatedly emit the earliest complete block and
    /// the emittable prose before it, then release any trailing prose that
    /// cannot be the prefix of an open block.
    fn extract(&mut self, events: &mut Vec<StreamEvent>) {
        while let Some((start, end, block)) = self.find_earliest_block() {
            let boundary = emit_boundary(&self.buffer[..start]);
            if boundary > 0 {
                events.push(StreamEvent::Text {
                    text: self.buffer[..boundary].to_string(),
                });
            }
            // Splice out the emitted prose and the matched span. Anything
            // between `boundary` and `start` sits inside a still-open outer
            // block and stays buffered.
            let mut rest = String::with_capacity(self.buffer.len() - (end - start) - boundary);
            rest.push_str(&self.buffer[boundary..start]);
            rest.push_str(&self.buffer[end..]);
            self.buffer = rest;

            self.emit_block(block, events);
        }

        let boundary = emit_boundary(&self.buffer);
        if boundary > 0 {
            let text: String = self.buffer.drain(..boundary).collect();
            events.push(StreamEvent::Text { text });
        }
    }

    /// Locate the complete block with the smallest start offset, if any.
    fn find_earliest_block(&self) -> Option<(usize, usize, Block)> {
        let buf = self.buffer.as_str();
        let mut best: Option<(usize, usize, Block)> = None;

        let mut consider = |candidate: Option<(usize, usize, Block)>| {
            if let Some((start, ..)) = candidate {
                if best.as_ref().map_or(true, |(s, ..)| start < *s) {
                    best = candidate;
                }
            }
        };

        consider(find_thinking(buf));
        consider(
            find_typed(buf, ENTITY_OPEN, ENTITY_CLOSE).map(|(start, end, entity_type, body)| {
                (start, end, Block::Entity { entity_type, body })
            }),
        );
        consider(find_action(buf));
        consider(
            find_typed(buf, RICH_OPEN, RICH_CLOSE).map(|(start, end, message_type, body)| {
                (start, end, Block::RichMessage { message_type, body })
            }),
        );

        best
    }

    fn emit_block(&mut self, block: Block, events: &mut Vec<StreamEvent>) {
        match block {
            Block::Thinking { inner } => {
                let steps = split_steps(inner.trim(), &mut self.step_counter);
                debug!(steps = steps.len(), "thinking block parsed");
                for step in steps {
                    events.push(StreamEvent::Thinking { step });
                }
            }
            Block::Entity { entity_type, body } => {
                match serde_json::from_str::<serde_json::Value>(body.trim()) {
                    Ok(data) => {
                        debug!(%entity_type, "entity block parsed");
                        events.push(StreamEvent::Entity {
                            entity: EntityDraft {
                                entity_type,
                                data,
                                id: Uuid::new_v4().to_string(),
                            },
                        });
                    }
                    Err(e) => {
                        warn!(%entity_type, error = %e, "entity payload is not valid JSON");
                        events.push(StreamEvent::Error {
                            error: ParseError::InvalidEntityPayload { entity_type },
                        });
                    }
                }
            }
            Block::Action {
                action_type,
                label,
                data,
            } => {
                // A bad data payload is tolerated silently, unlike entity
                // bodies — the action is still usable with empty data.
                let data = match data {
                    Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                        debug!(%action_type, error = %e, "action data is not valid JSON, using empty object");
                        serde_json::Value::Object(Default::default())
                    }),
                    None => serde_json::Value::Object(Default::default()),
                };
                debug!(%action_type, %label, "action tag parsed");
                events.push(StreamEvent::Action {
                    action: ActionSuggestion {
                        action_type,
                        label,
                        data,
                    },
                });
            }
            Block::RichMessage { message_type, body } => {
                match serde_json::from_str::<serde_json::Value>(body.trim()) {
                    Ok(content) => {
                        debug!(%message_type, "rich message block parsed");
                        events.push(StreamEvent::RichMessage {
                            message: RichMessage {
                                message_type,
                                content,
                            },
                        });
                    }
                    Err(e) => {
                        warn!(%message_type, error = %e, "rich message payload is not valid JSON");
                        events.push(StreamEvent::Error {
                            error: ParseError::InvalidRichMessagePayload { message_type },
                        });
                    }
                }
            }
        }
    }
}

/// Remove all recognized block markup from a complete response, returning
/// the trimmed plain prose. Used when a caller wants the displayable text
/// of an already-assembled message rather than a live event stream.
pub fn strip_blocks(text: &str) -> String {
    let mut parser = BlockParser::new();
    let mut out = String::new();
    for event in parser.feed(text).into_iter().chain(parser.flush()) {
        if let StreamEvent::Text { text } = event {
            out.push_str(&text);
        }
    }
    out.trim().to_string()
}

/// How much of `s` is definitely plain text: the index of the first opening
/// delimiter with no closing counterpart after it (including a partial
/// opener at the tail), or `s.len()` when nothing is held back.
fn emit_boundary(s: &str) -> usize {
    for (i, _) in s.match_indices('<') {
        if is_open_block(&s[i..]) {
            return i;
        }
    }
    s.len()
}

/// Does `rest` begin an open (unclosed) block or a partial opening
/// delimiter cut off by the chunk boundary?
fn is_open_block(rest: &str) -> bool {
    const PAIRS: &[(&str, &str)] = &[
        (THINKING_OPEN, THINKING_CLOSE),
        (ENTITY_OPEN, ENTITY_CLOSE),
        (ACTION_OPEN, ACTION_CLOSE),
        (RICH_OPEN, RICH_CLOSE),
    ];

    for (open, close) in PAIRS {
        if rest.len() < open.len() {
            // Tail shorter than the delimiter — held if it could still
            // grow into one.
            if open.starts_with(rest) {
                return true;
            }
            continue;
        }
        if !rest.starts_with(open) {
            continue;
        }
        // Attribute-carrying openers only count when followed by whitespace
        // (or the chunk boundary) — prose like "<ACTIONABLE" is not a tag.
        if !open.ends_with('>') {
            if let Some(c) = rest[open.len()..].chars().next() {
                if !c.is_whitespace() {
                    continue;
                }
            }
        }
        if !rest[open.len()..].contains(close) {
            return true;
        }
    }
    false
}

/// Find the earliest complete `<thinking>...</thinking>` span.
fn find_thinking(buf: &str) -> Option<(usize, usize, Block)> {
    let start = buf.find(THINKING_OPEN)?;
    let inner_start = start + THINKING_OPEN.len();
    let close = buf[inner_start..].find(THINKING_CLOSE)? + inner_start;
    Some((
        start,
        close + THINKING_CLOSE.len(),
        Block::Thinking {
            inner: buf[inner_start..close].to_string(),
        },
    ))
}

/// Find the earliest complete `<OPEN type="W">body</CLOSE>` span.
/// Occurrences with a malformed head never match and fall through to
/// plain text; a well-formed head without its closing tag means the block
/// is still open, so nothing later can match either.
fn find_typed(buf: &str, open: &str, close: &str) -> Option<(usize, usize, String, String)> {
    let mut search = 0;
    while let Some(rel) = buf[search..].find(open) {
        let start = search + rel;
        if let Some((block_type, head_len)) = match_typed_head(&buf[start + open.len()..]) {
            let body_start = start + open.len() + head_len;
            let body_end = body_start + buf[body_start..].find(close)?;
            return Some((
                start,
                body_end + close.len(),
                block_type,
                buf[body_start..body_end].to_string(),
            ));
        }
        search = start + open.len();
    }
    None
}

/// Match ` type="W">` immediately after an opening token, returning the
/// block type and the bytes consumed.
fn match_typed_head(rest: &str) -> Option<(String, usize)> {
    let ws = leading_ws(rest);
    if ws == 0 {
        return None;
    }
    let after = rest[ws..].strip_prefix("type=\"")?;
    let name_len = word_len(after);
    if name_len == 0 {
        return None;
    }
    let tail = after[name_len..].strip_prefix('"')?;
    if !tail.starts_with('>') {
        return None;
    }
    Some((after[..name_len].to_string(), ws + 6 + name_len + 2))
}

/// Find the earliest complete self-closing
/// `<ACTION type="W" label="L" data='J'/>` tag (`data` optional).
fn find_action(buf: &str) -> Option<(usize, usize, Block)> {
    let mut search = 0;
    while let Some(rel) = buf[search..].find(ACTION_OPEN) {
        let start = search + rel;
        if let Some((len, action_type, label, data)) =
            match_action_tag(&buf[start + ACTION_OPEN.len()..])
        {
            return Some((
                start,
                start + ACTION_OPEN.len() + len,
                Block::Action {
                    action_type,
                    label,
                    data,
                },
            ));
        }
        search = start + ACTION_OPEN.len();
    }
    None
}

/// Match the attribute list of an action tag immediately after `<ACTION`.
/// The shape is strict: `type` then `label` then optional `data`, with
/// `/>` directly after the last attribute.
fn match_action_tag(rest: &str) -> Option<(usize, String, String, Option<String>)> {
    let mut pos = leading_ws(rest);
    if pos == 0 {
        return None;
    }

    let after = rest[pos..].strip_prefix("type=\"")?;
    pos += 6;
    let n = word_len(after);
    if n == 0 {
        return None;
    }
    let action_type = after[..n].to_string();
    pos += n;
    if !rest[pos..].starts_with('"') {
        return None;
    }
    pos += 1;

    let ws = leading_ws(&rest[pos..]);
    if ws == 0 {
        return None;
    }
    pos += ws;
    let after = rest[pos..].strip_prefix("label=\"")?;
    pos += 7;
    let l = after.find('"')?;
    if l == 0 {
        return None;
    }
    let label = after[..l].to_string();
    pos += l + 1;

    if rest[pos..].starts_with(ACTION_CLOSE) {
        return Some((pos + 2, action_type, label, None));
    }

    let ws = leading_ws(&rest[pos..]);
    if ws == 0 {
        return None;
    }
    pos += ws;
    let after = rest[pos..].strip_prefix("data='")?;
    pos += 6;
    let d = after.find('\'')?;
    if d == 0 {
        return None;
    }
    let data = after[..d].to_string();
    pos += d + 1;

    if rest[pos..].starts_with(ACTION_CLOSE) {
        Some((pos + 2, action_type, label, Some(data)))
    } else {
        None
    }
}

fn leading_ws(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

fn word_len(s: &str) -> usize {
    s.len()
        - s.trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_')
            .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_straight_through() {
        let mut parser = BlockParser::new();
        let events = parser.feed("hello world");
        assert_eq!(
            events,
            vec![StreamEvent::Text {
                text: "hello world".to_string()
            }]
        );
        assert!(parser.flush().is_empty());
    }

    #[test]
    fn angle_brackets_in_prose_are_not_held() {
        let mut parser = BlockParser::new();
        let events = parser.feed("a < b and 1 <2> done");
        assert_eq!(
            events,
            vec![StreamEvent::Text {
                text: "a < b and 1 <2> done".to_string()
            }]
        );
    }

    #[test]
    fn partial_opener_at_tail_is_held_back() {
        let mut parser = BlockParser::new();
        let events = parser.feed("Hello <thi");
        assert_eq!(
            events,
            vec![StreamEvent::Text {
                text: "Hello ".to_string()
            }]
        );

        // Turns out it was prose after all — released on the next feed.
        let events = parser.feed("ck walls");
        assert_eq!(
            events,
            vec![StreamEvent::Text {
                text: "<thick walls".to_string()
            }]
        );
    }

    #[test]
    fn lookalike_tag_is_not_held() {
        let mut parser = BlockParser::new();
        let events = parser.feed("an <ACTIONABLE plan> here");
        assert_eq!(
            events,
            vec![StreamEvent::Text {
                text: "an <ACTIONABLE plan> here".to_string()
            }]
        );
    }

    #[test]
    fn malformed_entity_head_with_close_is_prose() {
        // No type attribute — the opening tag can never match, and the
        // closing tag proves nothing is still open.
        let mut parser = BlockParser::new();
        let events = parser.feed(r#"<CREATE_ENTITY kind="page">{}</CREATE_ENTITY>"#);
        assert_eq!(
            events,
            vec![StreamEvent::Text {
                text: r#"<CREATE_ENTITY kind="page">{}</CREATE_ENTITY>"#.to_string()
            }]
        );
    }

    #[test]
    fn action_with_space_before_slash_does_not_match() {
        let mut parser = BlockParser::new();
        let input = r#"<ACTION type="save" label="Save" />"#;
        let mut events = parser.feed(input);
        events.extend(parser.flush());
        assert_eq!(
            events,
            vec![StreamEvent::Text {
                text: input.to_string()
            }]
        );
    }

    #[test]
    fn action_with_empty_label_does_not_match() {
        let mut parser = BlockParser::new();
        let input = r#"<ACTION type="save" label=""/>"#;
        let mut events = parser.feed(input);
        events.extend(parser.flush());
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Text { .. }));
    }

    #[test]
    fn adjacent_blocks_resolve_in_one_pass() {
        let mut parser = BlockParser::new();
        let events = parser.feed(
            "<ACTION type=\"a\" label=\"A\"/><ACTION type=\"b\" label=\"B\"/>",
        );
        assert_eq!(events.len(), 2);
        match (&events[0], &events[1]) {
            (
                StreamEvent::Action { action: first },
                StreamEvent::Action { action: second },
            ) => {
                assert_eq!(first.action_type, "a");
                assert_eq!(second.action_type, "b");
            }
            other => panic!("expected two actions, got {other:?}"),
        }
    }

    #[test]
    fn entity_inside_open_thinking_waits_for_the_outer_close() {
        let mut parser = BlockParser::new();
        // Thinking is open, so the inner entity stays buffered with it.
        let events =
            parser.feed("<thinking>muse <CREATE_ENTITY type=\"page\">{}</CREATE_ENTITY>");
        // Entity is complete and gets extracted; the open thinking prefix
        // stays buffered without emitting prose.
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Entity { .. }));

        let events = parser.feed("</thinking>");
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Thinking { step } => assert_eq!(step.content, "muse"),
            other => panic!("expected thinking step, got {other:?}"),
        }
    }

    #[test]
    fn force_flush_past_the_cap() {
        let config = StreamConfig {
            max_buffer_bytes: 16,
        };
        let mut parser = BlockParser::with_config(&config);
        let events = parser.feed("<thinking>this grows and grows");
        assert_eq!(
            events,
            vec![StreamEvent::Text {
                text: "<thinking>this grows and grows".to_string()
            }]
        );
        assert!(parser.flush().is_empty());
    }

    #[test]
    fn zero_cap_means_unbounded() {
        let config = StreamConfig {
            max_buffer_bytes: 0,
        };
        let mut parser = BlockParser::with_config(&config);
        assert!(parser.feed("<thinking>held forever").is_empty());
        let events = parser.flush();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn strip_blocks_removes_all_markup() {
        let text = concat!(
            "Intro <thinking>Step 1: x</thinking> middle ",
            "<CREATE_ENTITY type=\"page\">{\"a\":1}</CREATE_ENTITY>",
            "<ACTION type=\"go\" label=\"Go\"/> outro ",
            "<RICH_MESSAGE type=\"form\">{}</RICH_MESSAGE>"
        );
        assert_eq!(strip_blocks(text), "Intro  middle  outro");
    }

    #[test]
    fn entity_ids_are_unique_per_emission() {
        let mut parser = BlockParser::new();
        let events = parser.feed(
            "<CREATE_ENTITY type=\"page\">{}</CREATE_ENTITY><CREATE_ENTITY type=\"page\">{}</CREATE_ENTITY>",
        );
        let ids: Vec<&str> = events
            .iter()
            .filter_map(|ev| match ev {
                StreamEvent::Entity { entity } => Some(entity.id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}
