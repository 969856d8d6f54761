//! CR Aggregator Runtime
//!
//! Reads newline-delimited JSON click/conversion records from stdin, keeps
//! running counts per (offer, affiliate, event code) and exports them to the
//! configured cache every `CR_EXPORT_PERIOD_SECS`.
//!
//! Usage:
//!   tail -F cr.log | cargo run --release --bin cr_aggregator
//!
//! Environment variables:
//!   CR_EXPORT_PERIOD_SECS - Export interval (default: 60)
//!   CR_TTL_MULTIPLIER - Cache TTL = period * multiplier (default: 3)
//!   CR_CACHE_BACKEND - memory | jsonl (default: memory)
//!   CR_CACHE_JSONL_PATH - JSONL output (default: cache/cr_aggregation.jsonl)
//!   CR_CHANNEL_BUFFER - Inbound channel size (default: 10000)

use cr_aggregator::pipeline::{
    config::{AggregationConfig, CacheBackend},
    ingestion::start_ingestion,
    Acknowledger, Aggregator, CacheWriter, InboundMessage, JsonRecordParser, JsonlCacheWriter,
    MemoryCacheWriter,
};
use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const TOPIC: &str = "stdin";

/// Stdin has no broker to report back to, so outcomes are only counted and logged
#[derive(Default)]
struct LoggingAcknowledger {
    acked: AtomicU64,
    failed: AtomicU64,
}

impl Acknowledger for LoggingAcknowledger {
    fn ack(&self, _message: &InboundMessage) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    fn fail(&self, message: &InboundMessage) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        warn!("Line {} rejected", message.id);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 CR Aggregator Runtime");

    let config = AggregationConfig::from_env();
    config.validate()?;

    let writer: Arc<dyn CacheWriter> = match &config.cache_backend {
        CacheBackend::Memory => Arc::new(MemoryCacheWriter::new()),
        CacheBackend::Jsonl(path) => Arc::new(JsonlCacheWriter::new(path.clone())?),
    };
    info!("✅ Cache backend: {}", writer.backend_type());

    let acker = Arc::new(LoggingAcknowledger::default());
    let aggregator = Arc::new(Aggregator::start(
        &config,
        Arc::new(JsonRecordParser),
        writer,
        acker.clone(),
    ));

    let (tx, rx) = mpsc::channel::<InboundMessage>(config.channel_buffer);
    info!("✅ Inbound channel created (buffer: {})", config.channel_buffer);

    let ingestion = tokio::spawn(start_ingestion(rx, aggregator.clone()));

    // Message source: one stdin line per message
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut line_no = 0u64;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    if tx.send(InboundMessage::from_body(line_no, TOPIC, line)).await.is_err() {
                        break; // Ingestion gone
                    }
                }
                Ok(None) => {
                    info!("📭 End of input after {} lines", line_no);
                    break;
                }
                Err(e) => {
                    error!("❌ Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    info!("🔄 Press CTRL+C to shutdown gracefully");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
            }
            reader.abort();
        }
        _ = ingestion => {
            info!("Input exhausted, shutting down...");
        }
    }

    aggregator.stop();
    aggregator.join().await;

    info!(
        "✅ CR Aggregator stopped (acked: {}, failed: {})",
        acker.acked.load(Ordering::Relaxed),
        acker.failed.load(Ordering::Relaxed)
    );
    Ok(())
}
