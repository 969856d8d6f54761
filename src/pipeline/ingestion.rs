//! Ingestion path - inbound message → counter mutation → ack/fail
//!
//! Exactly one `ack` or `fail` is signalled per message, and exactly one
//! counter is bumped per successfully decoded record.

use super::error::DecodeError;
use super::parser::RecordParser;
use super::runtime::Aggregator;
use super::store::AggregateStore;
use super::types::{Acknowledger, InboundMessage, Record};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Acked,
    Failed,
}

pub struct IngestionPath {
    store: Arc<AggregateStore>,
    parser: Arc<dyn RecordParser>,
    acker: Arc<dyn Acknowledger>,
    checkpoint_every: u64,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl IngestionPath {
    pub fn new(
        store: Arc<AggregateStore>,
        parser: Arc<dyn RecordParser>,
        acker: Arc<dyn Acknowledger>,
        checkpoint_every: u64,
    ) -> Self {
        Self {
            store,
            parser,
            acker,
            checkpoint_every: checkpoint_every.max(1),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Decode one message, apply it to the store and signal the broker.
    pub fn process(&self, message: &InboundMessage) -> IngestOutcome {
        match self.decode(message) {
            Ok(record) => {
                self.store
                    .increment(&record.offer_id, &record.affiliate_id, &record.event_code);
                self.acker.ack(message);

                let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
                if processed % self.checkpoint_every == 0 {
                    log::info!("📊 {} messages aggregated", processed);
                }
                IngestOutcome::Acked
            }
            Err(DecodeError::UnexpectedShape(detail)) => {
                log::error!("Message {} has unexpected shape: {}", message.id, detail);
                self.reject(message)
            }
            Err(e) => {
                let msg_id = message.payload().map(|m| m.msg_id.as_str()).unwrap_or("-");
                log::warn!("⚠️  Failed to decode message {} (msg_id: {}): {}", message.id, msg_id, e);
                self.reject(message)
            }
        }
    }

    fn decode(&self, message: &InboundMessage) -> Result<Record, DecodeError> {
        match (message.payload(), message.stat()) {
            (Some(payload), Some(_)) if message.values.len() == 2 => self.parser.parse(&payload.body),
            _ => {
                let found = message
                    .values
                    .iter()
                    .map(|v| v.kind())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(DecodeError::UnexpectedShape(format!(
                    "expected [message, stat], got [{}]",
                    found
                )))
            }
        }
    }

    fn reject(&self, message: &InboundMessage) -> IngestOutcome {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.acker.fail(message);
        IngestOutcome::Failed
    }

    /// Messages acknowledged so far
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Messages failed back to the broker so far
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Drain the inbound channel into the aggregator
///
/// Runs until the channel is closed (message source shutdown).
pub async fn start_ingestion(mut rx: mpsc::Receiver<InboundMessage>, aggregator: Arc<Aggregator>) {
    log::info!("🚀 Starting ingestion, waiting for messages...");

    while let Some(message) = rx.recv().await {
        aggregator.process(&message);
    }

    log::warn!("⚠️  Inbound channel closed, stopping ingestion");
    log::info!(
        "✅ Ingestion stopped (acked: {}, failed: {})",
        aggregator.ingestion().processed(),
        aggregator.ingestion().failed()
    );
}
