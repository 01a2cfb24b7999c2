//! Ordered, backpressured delivery of execution steps to one consumer.

use chartwise_core::step::ExecutionStep;
use tokio::sync::mpsc;

use crate::stream_event::StreamEvent;

/// Why a step could not be emitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream consumer has gone away")]
    StreamClosed,

    #[error("a terminal step was already emitted")]
    AlreadyTerminated,
}

/// Producer side of a run's event stream.
///
/// The channel holds a single event, so `emit` waits for the consumer to
/// take the previous one before it returns.
pub struct StepStreamer {
    tx: mpsc::Sender<StreamEvent>,
    terminated: bool,
    emitted: usize,
}

impl StepStreamer {
    /// Create a streamer and the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                tx,
                terminated: false,
                emitted: 0,
            },
            rx,
        )
    }

    /// Send one step to the consumer.
    pub async fn emit(&mut self, step: ExecutionStep) -> Result<(), StreamError> {
        if self.terminated {
            return Err(StreamError::AlreadyTerminated);
        }
        let terminal = step.is_terminal();
        self.tx
            .send(StreamEvent::from(step))
            .await
            .map_err(|_| StreamError::StreamClosed)?;
        self.emitted += 1;
        self.terminated = terminal;
        Ok(())
    }

    /// Whether the consumer dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Number of events delivered so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (mut streamer, mut rx) = StepStreamer::channel();
        let producer = tokio::spawn(async move {
            streamer.emit(ExecutionStep::thought("one")).await.unwrap();
            streamer.emit(ExecutionStep::thought("two")).await.unwrap();
            streamer.emit(ExecutionStep::final_answer("Done")).await.unwrap();
            streamer.emitted()
        });

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event);
        }
        assert_eq!(producer.await.unwrap(), 3);
        assert_eq!(
            seen,
            vec![
                StreamEvent::Thought { content: "one".into() },
                StreamEvent::Thought { content: "two".into() },
                StreamEvent::Final { content: "Done".into() },
            ]
        );
    }

    #[tokio::test]
    async fn emit_waits_for_the_consumer() {
        let (mut streamer, mut rx) = StepStreamer::channel();
        streamer.emit(ExecutionStep::thought("buffered")).await.unwrap();

        // The single slot is full, so the next emit must not complete.
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            streamer.emit(ExecutionStep::thought("waiting")),
        )
        .await;
        assert!(blocked.is_err());

        assert_eq!(
            rx.recv().await.unwrap(),
            StreamEvent::Thought { content: "buffered".into() }
        );
        streamer.emit(ExecutionStep::thought("now fits")).await.unwrap();
    }

    #[tokio::test]
    async fn nothing_after_terminal() {
        let (mut streamer, _rx) = StepStreamer::channel();
        streamer.emit(ExecutionStep::failure("boom")).await.unwrap();
        assert!(streamer.is_terminated());

        let err = streamer.emit(ExecutionStep::thought("late")).await.unwrap_err();
        assert_eq!(err, StreamError::AlreadyTerminated);
    }

    #[tokio::test]
    async fn dropped_consumer_closes_stream() {
        let (mut streamer, rx) = StepStreamer::channel();
        drop(rx);
        assert!(streamer.is_closed());

        let err = streamer.emit(ExecutionStep::thought("lost")).await.unwrap_err();
        assert_eq!(err, StreamError::StreamClosed);
    }
}
