//! The single-producer, single-consumer event channel for one run.
//!
//! The producer side enforces the closing contract at the type level:
//! non-terminal events go through [`EventSink::emit`], and the stream is
//! closed by [`EventSink::close_with`], which consumes the sink so nothing
//! can be emitted afterwards.

use tokio::sync::mpsc;
use tracing::debug;

use crate::event::ChainEvent;

const EVENT_BUFFER: usize = 64;

/// Create a connected sink/stream pair for one run.
pub fn channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    (EventSink { tx }, EventStream { rx })
}

/// Producer side, held by the step driver.
pub struct EventSink {
    tx: mpsc::Sender<ChainEvent>,
}

impl EventSink {
    /// Emit a non-terminal event. A closed consumer is not an error — the
    /// run keeps going, events are just dropped.
    pub async fn emit(&self, event: ChainEvent) {
        debug_assert!(!event.is_terminal(), "terminal events must use close_with");
        if self.tx.send(event).await.is_err() {
            debug!("event consumer gone, dropping event");
        }
    }

    /// Emit the terminal event and close the stream. Consumes the sink, so
    /// the stream closes exactly once.
    pub async fn close_with(self, event: ChainEvent) {
        debug_assert!(event.is_terminal(), "close_with requires a terminal event");
        if self.tx.send(event).await.is_err() {
            debug!("event consumer gone, dropping terminal event");
        }
    }

    /// Close the stream without a terminal event. Only used on abort, where
    /// the contract is "stream closes immediately, no error event".
    pub fn close_silently(self) {}
}

/// Consumer side, handed to whoever started the run.
pub struct EventStream {
    rx: mpsc::Receiver<ChainEvent>,
}

impl EventStream {
    /// Next event; `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<ChainEvent> {
        self.rx.recv().await
    }

    /// Adapt into a `futures::Stream` for combinator-style consumers.
    pub fn into_stream(self) -> tokio_stream::wrappers::ReceiverStream<ChainEvent> {
        tokio_stream::wrappers::ReceiverStream::new(self.rx)
    }

    /// Drain the stream to the end. Test helper.
    pub async fn collect(mut self) -> Vec<ChainEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepchain_core::provider::{FinishReason, Usage};

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, stream) = channel();

        sink.emit(ChainEvent::ChainStarted).await;
        sink.emit(ChainEvent::StepStarted).await;
        sink.close_with(ChainEvent::ChainCompleted {
            finish_reason: FinishReason::Stop,
            token_usage: Usage::default(),
        })
        .await;

        let events = stream.collect().await;
        let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["chain_started", "step_started", "chain_completed"]);
    }

    #[tokio::test]
    async fn stream_ends_after_terminal_event() {
        let (sink, mut stream) = channel();
        sink.close_with(ChainEvent::ToolsRequested { tools: vec![] })
            .await;

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn silent_close_ends_stream_without_event() {
        let (sink, mut stream) = channel();
        sink.emit(ChainEvent::ChainStarted).await;
        sink.close_silently();

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_consumer_does_not_panic() {
        let (sink, stream) = channel();
        drop(stream);
        sink.emit(ChainEvent::ChainStarted).await;
        sink.close_with(ChainEvent::ChainCompleted {
            finish_reason: FinishReason::Stop,
            token_usage: Usage::default(),
        })
        .await;
    }
}
