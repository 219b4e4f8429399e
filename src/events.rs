//! Typed events streamed to the chat client during a pipeline invocation.
//!
//! Every invocation produces an ordered sequence of [`ChatEvent`]s over a
//! bounded-lifetime channel: zero or more `status`/`token` events, at most one
//! `error`, and exactly one terminal `end`. The JSON shape is stable and is
//! what a websocket/SSE layer forwards verbatim:
//!
//! ```json
//! {"type": "token", "content": "Hello"}
//! ```

use futures_util::Stream;
use serde::{Deserialize, Serialize};

/// A single event on the per-invocation stream.
///
/// Serialized with an adjacent `type`/`content` tag so the client can switch
/// on `type` without schema knowledge of each variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Progress notice for the client UI ("Retrieving documents...").
    Status(String),
    /// One fragment of the answer, in generation order. Concatenating all
    /// token events of an invocation yields the full response text.
    Token(String),
    /// Generic failure notice. Detail goes to tracing, never to the client.
    Error(String),
    /// Terminal sentinel. Always emitted, exactly once, as the last event.
    End(String),
}

impl ChatEvent {
    /// Progress notice.
    pub fn status(content: impl Into<String>) -> Self {
        Self::Status(content.into())
    }

    /// Answer fragment.
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token(content.into())
    }

    /// Generic failure notice.
    pub fn error(content: impl Into<String>) -> Self {
        Self::Error(content.into())
    }

    /// Terminal sentinel with empty content.
    pub fn end() -> Self {
        Self::End(String::new())
    }

    /// True for the terminal [`ChatEvent::End`] sentinel.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End(_))
    }

    /// Token content, if this is a token event.
    #[must_use]
    pub fn as_token(&self) -> Option<&str> {
        match self {
            Self::Token(content) => Some(content),
            _ => None,
        }
    }
}

/// Consumer handle for the events of one pipeline invocation.
///
/// Obtained from [`Pipeline::stream`](crate::pipeline::Pipeline::stream). The
/// producing task holds the sending half; once it finishes (always after
/// emitting [`ChatEvent::End`]) the stream yields `None`.
///
/// # Examples
///
/// ```rust,ignore
/// let mut events = pipeline.stream("Where is my order?", "tenant-a", "thread-1");
/// while let Some(event) = events.next().await {
///     println!("{}", serde_json::to_string(&event)?);
/// }
/// ```
pub struct EventStream {
    receiver: flume::Receiver<ChatEvent>,
}

impl EventStream {
    pub(crate) fn new(receiver: flume::Receiver<ChatEvent>) -> Self {
        Self { receiver }
    }

    /// Await the next event, or `None` once the invocation has finished and
    /// the channel drained.
    pub async fn next(&mut self) -> Option<ChatEvent> {
        self.receiver.recv_async().await.ok()
    }

    /// Drain the stream to completion, collecting every event in order.
    ///
    /// Mostly useful in tests and batch callers; interactive clients should
    /// forward events as [`next`](Self::next) yields them.
    pub async fn collect(mut self) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    /// Convert into a [`futures_util::Stream`] of events for combinator-based
    /// consumers.
    pub fn into_stream(self) -> impl Stream<Item = ChatEvent> + Send {
        self.receiver.into_stream()
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("pending", &self.receiver.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_type_and_content_fields() {
        let cases = [
            (ChatEvent::status("Retrieving documents..."), "status"),
            (ChatEvent::token("Hel"), "token"),
            (ChatEvent::error("An error occurred"), "error"),
            (ChatEvent::end(), "end"),
        ];
        for (event, tag) in cases {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], json!(tag));
            assert!(value["content"].is_string());
        }
    }

    #[test]
    fn end_sentinel_has_empty_content() {
        let value = serde_json::to_value(ChatEvent::end()).unwrap();
        assert_eq!(value, json!({"type": "end", "content": ""}));
        assert!(ChatEvent::end().is_end());
    }

    #[test]
    fn deserializes_from_wire_shape() {
        let event: ChatEvent =
            serde_json::from_value(json!({"type": "token", "content": "Hi"})).unwrap();
        assert_eq!(event.as_token(), Some("Hi"));
    }

    #[tokio::test]
    async fn stream_yields_in_order_then_none() {
        let (tx, rx) = flume::unbounded();
        tx.send(ChatEvent::status("working")).unwrap();
        tx.send(ChatEvent::token("a")).unwrap();
        tx.send(ChatEvent::end()).unwrap();
        drop(tx);

        let events = EventStream::new(rx).collect().await;
        assert_eq!(
            events,
            vec![
                ChatEvent::status("working"),
                ChatEvent::token("a"),
                ChatEvent::end(),
            ]
        );
    }
}
