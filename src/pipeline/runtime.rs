//! Aggregator lifecycle: start → process* → stop → join

use super::cache::CacheWriter;
use super::config::AggregationConfig;
use super::export::{ExportTask, StopSignal};
use super::ingestion::{IngestOutcome, IngestionPath};
use super::parser::RecordParser;
use super::store::AggregateStore;
use super::types::{Acknowledger, InboundMessage};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Click/conversion aggregation stage
///
/// Owns the aggregate store, the ingestion path feeding it and the background
/// export task draining it. One instance owns its partition of keys.
pub struct Aggregator {
    store: Arc<AggregateStore>,
    ingestion: IngestionPath,
    stop: Arc<StopSignal>,
    export_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Aggregator {
    /// Create the empty store and spawn the export task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &AggregationConfig,
        parser: Arc<dyn RecordParser>,
        writer: Arc<dyn CacheWriter>,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        let store = Arc::new(AggregateStore::new(config.counter_base, config.counter_increment));
        let stop = Arc::new(StopSignal::new());

        let ingestion = IngestionPath::new(store.clone(), parser, acker, config.checkpoint_every);
        let export_task = ExportTask::new(store.clone(), writer, stop.clone(), config);
        let export_handle = tokio::spawn(export_task.run());

        log::info!("✅ Aggregator started");
        log::info!("   ├─ Counter base: {}, increment: {}", config.counter_base, config.counter_increment);
        log::info!("   └─ Export every {}s, ttl {}s", config.period_secs, config.ttl_secs());

        Self {
            store,
            ingestion,
            stop,
            export_handle: Mutex::new(Some(export_handle)),
        }
    }

    pub fn process(&self, message: &InboundMessage) -> IngestOutcome {
        self.ingestion.process(message)
    }

    /// Ask the export task to stop after its current cycle.
    pub fn stop(&self) {
        if self.stop.stop() {
            log::info!("⚠️  Stop requested, export task will exit at the next cycle boundary");
        } else {
            log::debug!("Stop already requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Wait for the export task to exit. Call after [`stop`](Self::stop).
    pub async fn join(&self) {
        let handle = self
            .export_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("❌ Export task ended abnormally: {}", e);
            }
        }
    }

    pub fn store(&self) -> &Arc<AggregateStore> {
        &self.store
    }

    pub fn ingestion(&self) -> &IngestionPath {
        &self.ingestion
    }
}
