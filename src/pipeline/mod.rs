//! # Click/Conversion Aggregation Pipeline
//!
//! Single-producer / single-consumer pipeline over one swappable aggregate:
//!
//! ```text
//! broker message → RecordParser → IngestionPath → AggregateStore::increment
//!                                                        │
//!                        (every PERIOD) ExportTask ── swap()
//!                                                        ↓
//!                          ExportPayload → CacheWriter::set_with_ttl
//! ```
//!
//! **Key property:** ingestion never blocks on export. The export task
//! atomically replaces the store reference and drains the detached instance
//! on its own time.
//!
//! ## Module Organization
//!
//! - `types` - Record, inbound message shape, acknowledgement trait
//! - `parser` - JSON record parser
//! - `store` - Aggregate store and its swap protocol
//! - `ingestion` - Per-message decode/increment/ack
//! - `export` - Bucket, payload formatting, periodic export loop
//! - `cache` / `jsonl_cache` - Cache writer backends
//! - `runtime` - Start/stop lifecycle
//! - `config` - Environment configuration

pub mod types;
pub mod error;
pub mod config;
pub mod parser;
pub mod store;
pub mod ingestion;
pub mod export;
pub mod cache;
pub mod jsonl_cache;
pub mod runtime;

// Re-export commonly used types
pub use types::{Acknowledger, EventCategory, InboundMessage, Record, TupleValue};
pub use error::{CacheWriteError, ConfigError, DecodeError};
pub use config::{AggregationConfig, CacheBackend};
pub use parser::{JsonRecordParser, RecordParser};
pub use store::{AggregateStore, Snapshot};
pub use ingestion::{start_ingestion, IngestOutcome, IngestionPath};
pub use export::{bucket_for, cache_key, CycleReport, ExportPayload, ExportTask, StopSignal};
pub use cache::{CacheWriter, MemoryCacheWriter};
pub use jsonl_cache::JsonlCacheWriter;
pub use runtime::Aggregator;
