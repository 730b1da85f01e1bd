//! Channel-backed response streams.
//!
//! A producer task owns a [`UnitEmitter`] and pushes [`StreamUnit`]s into a
//! bounded channel; the consumer pulls them through a [`UnitStream`].
//! Dropping the stream closes the channel, and producers watch
//! [`UnitEmitter::closed`] so they stop promptly.

use crate::error::ProviderError;
use crate::types::{StreamUnit, Usage};
use chrono::Utc;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

/// Buffered units between a producer and its consumer.
const CHANNEL_CAPACITY: usize = 64;

/// Single-consumption sequence of response units.
///
/// The sequence ends when the backend reports completion, or yields one
/// final `Err` when the request fails.
pub type UnitStream = Pin<Box<dyn Stream<Item = Result<StreamUnit, ProviderError>> + Send>>;

/// Short request identifier shared by every unit of one request.
pub fn new_request_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Create a connected emitter/stream pair for one request.
pub fn unit_channel(backend: &str, model: &str) -> (UnitEmitter, UnitStream) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let emitter = UnitEmitter {
        tx,
        request_id: new_request_id(),
        backend: backend.to_string(),
        model: model.to_string(),
        next_sequence: 1,
    };
    (emitter, Box::pin(ReceiverStream::new(rx)))
}

/// Producer half of a [`UnitStream`]. Assigns sequence numbers from 1.
pub struct UnitEmitter {
    tx: mpsc::Sender<Result<StreamUnit, ProviderError>>,
    request_id: String,
    backend: String,
    model: String,
    next_sequence: u64,
}

impl UnitEmitter {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Number of units sent so far.
    pub fn emitted(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Send a text fragment. Returns `false` once the consumer is gone.
    pub async fn emit(&mut self, content: impl Into<String>) -> bool {
        self.send_unit(content.into(), None).await
    }

    /// Send an empty-content unit carrying usage counters.
    pub async fn emit_usage(&mut self, usage: Usage) -> bool {
        self.send_unit(String::new(), Some(usage)).await
    }

    /// Send a complete response as a single unit.
    pub async fn emit_with_usage(&mut self, content: impl Into<String>, usage: Option<Usage>) -> bool {
        self.send_unit(content.into(), usage).await
    }

    /// Terminate the sequence with an error.
    pub async fn fail(self, err: ProviderError) {
        let _ = self.tx.send(Err(err)).await;
    }

    /// Resolves once the consumer has dropped the stream.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send_unit(&mut self, content: String, usage: Option<Usage>) -> bool {
        let unit = StreamUnit {
            content,
            sequence: self.next_sequence,
            request_id: self.request_id.clone(),
            timestamp: Utc::now(),
            model: self.model.clone(),
            backend: self.backend.clone(),
            usage,
        };
        if self.tx.send(Ok(unit)).await.is_err() {
            return false;
        }
        self.next_sequence += 1;
        true
    }
}

/// Drain a stream, stopping at the first error.
pub async fn collect_units(mut stream: UnitStream) -> Result<Vec<StreamUnit>, ProviderError> {
    let mut units = Vec::new();
    while let Some(item) = stream.next().await {
        units.push(item?);
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_numbers_start_at_one_and_have_no_gaps() {
        let (mut emitter, stream) = unit_channel("Test", "m1");
        tokio::spawn(async move {
            emitter.emit("a").await;
            emitter.emit("b").await;
            emitter.emit_usage(Usage { total_tokens: 7, ..Usage::default() }).await;
        });

        let units = collect_units(stream).await.unwrap();
        let sequences: Vec<u64> = units.iter().map(|u| u.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(units.iter().all(|u| u.request_id == units[0].request_id));
        assert_eq!(units[2].content, "");
        assert_eq!(units[2].usage.as_ref().unwrap().total_tokens, 7);
    }

    #[tokio::test]
    async fn each_channel_gets_its_own_sequence_and_request_id() {
        let (mut first, first_stream) = unit_channel("Test", "m1");
        let (mut second, second_stream) = unit_channel("Test", "m1");
        first.emit("x").await;
        second.emit("y").await;
        drop(first);
        drop(second);

        let a = collect_units(first_stream).await.unwrap();
        let b = collect_units(second_stream).await.unwrap();
        assert_eq!(a[0].sequence, 1);
        assert_eq!(b[0].sequence, 1);
        assert_ne!(a[0].request_id, b[0].request_id);
    }

    #[tokio::test]
    async fn failure_is_delivered_as_final_item() {
        let (mut emitter, stream) = unit_channel("Test", "m1");
        emitter.emit("partial").await;
        emitter.fail(ProviderError::connection("Test", "reset")).await;

        let result = collect_units(stream).await;
        assert_eq!(result.unwrap_err(), ProviderError::connection("Test", "reset"));
    }

    #[tokio::test]
    async fn emitter_notices_dropped_consumer() {
        let (mut emitter, stream) = unit_channel("Test", "m1");
        drop(stream);
        assert!(emitter.is_closed());
        assert!(!emitter.emit("ignored").await);
        assert_eq!(emitter.emitted(), 0);
    }

    #[test]
    fn request_ids_are_eight_hex_chars() {
        let id = new_request_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
