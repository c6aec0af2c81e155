use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::StreamEvent;
use crate::parser::BlockParser;

/// Pump an ordered stream of text fragments through a parser and forward
/// every recognized event into `tx`. Sends are awaited one at a time, so
/// receivers observe events in exact emission order.
///
/// Returns when the input ends (after a final flush) or when the receiver
/// is dropped.
pub async fn relay_stream<S>(mut parser: BlockParser, mut chunks: S, tx: mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = String> + Unpin,
{
    while let Some(chunk) = chunks.next().await {
        for event in parser.feed(&chunk) {
            debug!(kind = event.kind(), "relay event");
            if tx.send(event).await.is_err() {
                return; // receiver dropped
            }
        }
    }

    for event in parser.flush() {
        debug!(kind = event.kind(), "relay event (flush)");
        if tx.send(event).await.is_err() {
            return;
        }
    }
}
