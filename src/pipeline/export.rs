//! Export task - periodic cut-over and cache export of the aggregate
//!
//! Each cycle:
//! 1. `swap()` the aggregate store (skip the cycle if the snapshot is empty)
//! 2. Compute one UTC+8 time bucket for the whole cycle
//! 3. Per (offer, affiliate): split counters into click/conversion, render,
//!    write `offer_affiliate_bucket` with TTL `PERIOD * NUMBERS`
//!
//! A failed write is logged and its siblings are still written. Nothing is
//! retried; a lost bucket is an accepted trade-off of lossy aggregation.

use super::cache::CacheWriter;
use super::config::{AggregationConfig, BUCKET_FORMAT, BUCKET_UTC_OFFSET_SECS};
use super::store::{AggregateStore, EventCounts, Snapshot};
use super::types::EventCategory;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Time bucket string for `now`, in UTC+8 as `yyyyMMddHHmmss`.
pub fn bucket_for(now: DateTime<Utc>) -> String {
    // 8h is always a valid offset
    let offset = FixedOffset::east_opt(BUCKET_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset).format(BUCKET_FORMAT).to_string()
}

pub fn cache_key(offer_id: &str, affiliate_id: &str, bucket: &str) -> String {
    format!("{}_{}_{}", offer_id, affiliate_id, bucket)
}

/// `{a: 1, b: 2}`, or `{}` for an empty partition.
pub fn render_counts(counts: &BTreeMap<String, u64>) -> String {
    let body = counts
        .iter()
        .map(|(code, count)| format!("{}: {}", code, count))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", body)
}

/// Click/conversion split of one (offer, affiliate) pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportPayload {
    pub click: BTreeMap<String, u64>,
    pub conversion: BTreeMap<String, u64>,
}

impl ExportPayload {
    pub fn from_events(events: &EventCounts) -> Self {
        let mut payload = Self::default();
        for (code, count) in events {
            let partition = match EventCategory::of(code) {
                EventCategory::Click => &mut payload.click,
                EventCategory::Conversion => &mut payload.conversion,
            };
            partition.insert(code.clone(), *count);
        }
        payload
    }

    /// `{click: <click-blob>, conversion: <conversion-blob>}`
    pub fn render(&self) -> String {
        format!(
            "{{click: {}, conversion: {}}}",
            render_counts(&self.click),
            render_counts(&self.conversion)
        )
    }
}

/// Outcome of one export cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub bucket: Option<String>,
    pub payloads: usize,
    pub written: usize,
    pub failed: usize,
}

impl CycleReport {
    pub fn is_noop(&self) -> bool {
        self.bucket.is_none()
    }
}

/// Why the export loop woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Elapsed,
    Interrupted,
    Stopped,
}

/// Cooperative stop flag shared between the lifecycle owner and the loop
///
/// Stopping also wakes the loop out of its sleep; a stop raised mid-cycle is
/// remembered by the `Notify` permit and cuts the following sleep short.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    wake: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `false` if it was already raised.
    pub fn stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        if first {
            self.wake.notify_one();
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `period` or until woken.
    async fn sleep(&self, period: Duration) -> Wake {
        tokio::select! {
            _ = tokio::time::sleep(period) => Wake::Elapsed,
            _ = self.wake.notified() => {
                if self.is_stopped() {
                    Wake::Stopped
                } else {
                    Wake::Interrupted
                }
            }
        }
    }
}

pub struct ExportTask {
    store: Arc<AggregateStore>,
    writer: Arc<dyn CacheWriter>,
    stop: Arc<StopSignal>,
    period: Duration,
    ttl_secs: u64,
}

impl ExportTask {
    pub fn new(
        store: Arc<AggregateStore>,
        writer: Arc<dyn CacheWriter>,
        stop: Arc<StopSignal>,
        config: &AggregationConfig,
    ) -> Self {
        Self {
            store,
            writer,
            stop,
            period: config.period(),
            ttl_secs: config.ttl_secs(),
        }
    }

    /// Run until the stop signal is observed at the top of an iteration.
    pub async fn run(self) {
        log::info!(
            "⏰ Starting export task (period: {}s, ttl: {}s, backend: {})",
            self.period.as_secs(),
            self.ttl_secs,
            self.writer.backend_type()
        );

        while !self.stop.is_stopped() {
            self.export_cycle(Utc::now()).await;

            match self.stop.sleep(self.period).await {
                Wake::Interrupted => log::warn!("⚠️  Export sleep interrupted, continuing early"),
                Wake::Stopped => log::debug!("Export sleep cut short by stop"),
                Wake::Elapsed => {}
            }
        }

        log::info!("✅ Export task stopped");
    }

    /// One cut-over: swap the store and export the detached snapshot.
    pub async fn export_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        log::debug!("🔄 Start to export aggregation result");
        let snapshot = self.store.swap();
        if snapshot.is_empty() {
            log::debug!("Aggregate empty, nothing to export");
            return CycleReport::default();
        }
        self.export_snapshot(&snapshot, now).await
    }

    pub async fn export_snapshot(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> CycleReport {
        let started = Instant::now();
        let bucket = bucket_for(now);
        log::info!(
            "🔄 Exporting {} payloads (bucket: {})",
            snapshot.pair_count(),
            bucket
        );

        let mut report = CycleReport {
            bucket: Some(bucket.clone()),
            ..CycleReport::default()
        };

        for (offer_id, affiliate_id, events) in snapshot.iter() {
            let payload = ExportPayload::from_events(events);
            let key = cache_key(offer_id, affiliate_id, &bucket);
            for (category, counts) in [
                (EventCategory::Click, &payload.click),
                (EventCategory::Conversion, &payload.conversion),
            ] {
                log::debug!("[{}] {} = {}", category.as_str(), key, render_counts(counts));
            }

            report.payloads += 1;
            match self.writer.set_with_ttl(&key, self.ttl_secs, &payload.render()).await {
                Ok(()) => report.written += 1,
                Err(e) => {
                    report.failed += 1;
                    log::error!("❌ Failed to export {} (offer: {}, affiliate: {}): {}", key, offer_id, affiliate_id, e);
                }
            }
        }

        log::info!(
            "✅ Export done: {} payloads, {} failed | {}ms",
            report.payloads,
            report.failed,
            started.elapsed().as_millis()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cache::MemoryCacheWriter;
    use crate::pipeline::error::CacheWriteError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Fails writes for keys starting with a given offer, records the rest
    /// as (key, ttl)
    struct FlakyWriter {
        fail_offer: String,
        written: Mutex<Vec<(String, u64)>>,
    }

    impl FlakyWriter {
        fn new(fail_offer: &str) -> Self {
            Self {
                fail_offer: fail_offer.to_string(),
                written: Mutex::new(Vec::new()),
            }
        }

        fn written(&self) -> Vec<(String, u64)> {
            let mut written = self.written.lock().unwrap().clone();
            written.sort();
            written
        }
    }

    #[async_trait]
    impl CacheWriter for FlakyWriter {
        async fn set_with_ttl(&self, key: &str, ttl_secs: u64, _value: &str) -> Result<(), CacheWriteError> {
            if key.starts_with(&format!("{}_", self.fail_offer)) {
                return Err(CacheWriteError::Unavailable("connection reset".to_string()));
            }
            self.written.lock().unwrap().push((key.to_string(), ttl_secs));
            Ok(())
        }

        fn backend_type(&self) -> &'static str {
            "flaky"
        }
    }

    fn make_task(store: Arc<AggregateStore>, writer: Arc<dyn CacheWriter>) -> ExportTask {
        let config = AggregationConfig {
            period_secs: 30,
            ttl_multiplier: 2,
            ..AggregationConfig::default()
        };
        ExportTask::new(store, writer, Arc::new(StopSignal::new()), &config)
    }

    fn noon_utc() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 4, 0, 0).unwrap()
    }

    #[test]
    fn test_bucket_is_utc_plus_eight() {
        assert_eq!(bucket_for(noon_utc()), "20240101120000");

        // Crosses the date line relative to UTC
        let late = Utc.with_ymd_and_hms(2023, 12, 31, 20, 30, 5).unwrap();
        assert_eq!(bucket_for(late), "20240101043005");
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(cache_key("10", "5", "20240101120000"), "10_5_20240101120000");
    }

    #[test]
    fn test_render_counts() {
        assert_eq!(render_counts(&BTreeMap::new()), "{}");

        let mut counts = BTreeMap::new();
        counts.insert("CLICK1".to_string(), 2);
        assert_eq!(render_counts(&counts), "{CLICK1: 2}");

        counts.insert("CLICK2".to_string(), 7);
        assert_eq!(render_counts(&counts), "{CLICK1: 2, CLICK2: 7}");
    }

    #[test]
    fn test_partition_is_total_and_disjoint() {
        let mut events = EventCounts::new();
        for (code, count) in [("CLICK1", 2), ("C", 1), ("INSTALL", 4), ("purchase", 1), ("", 3)] {
            events.insert(code.to_string(), count);
        }

        let payload = ExportPayload::from_events(&events);

        assert!(payload.click.keys().all(|k| !payload.conversion.contains_key(k)));
        assert_eq!(payload.click.len() + payload.conversion.len(), events.len());
        assert!(payload.click.keys().all(|k| k.starts_with('C')));
        assert!(payload.conversion.keys().all(|k| !k.starts_with('C')));
        assert_eq!(payload.conversion.get("INSTALL"), Some(&4));
    }

    #[test]
    fn test_payload_render() {
        let mut events = EventCounts::new();
        events.insert("CLICK1".to_string(), 2);
        events.insert("INSTALL".to_string(), 1);

        assert_eq!(
            ExportPayload::from_events(&events).render(),
            "{click: {CLICK1: 2}, conversion: {INSTALL: 1}}"
        );
        assert_eq!(
            ExportPayload::default().render(),
            "{click: {}, conversion: {}}"
        );
    }

    #[tokio::test]
    async fn test_empty_snapshot_writes_nothing() {
        let store = Arc::new(AggregateStore::default());
        let cache = Arc::new(MemoryCacheWriter::new());
        let task = make_task(store, cache.clone());

        let report = task.export_cycle(noon_utc()).await;

        assert!(report.is_noop());
        assert_eq!(report.payloads, 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_exports_each_pair() {
        let store = Arc::new(AggregateStore::default());
        let cache = Arc::new(MemoryCacheWriter::new());
        let task = make_task(store.clone(), cache.clone());

        store.increment("10", "5", "CLICK1");
        store.increment("10", "5", "INSTALL");
        store.increment("10", "5", "CLICK1");
        store.increment("10", "6", "PURCHASE");

        let report = task.export_cycle(noon_utc()).await;

        assert_eq!(report.bucket.as_deref(), Some("20240101120000"));
        assert_eq!(report.payloads, 2);
        assert_eq!(report.written, 2);
        assert_eq!(
            cache.get("10_5_20240101120000").as_deref(),
            Some("{click: {CLICK1: 2}, conversion: {INSTALL: 1}}")
        );
        assert_eq!(
            cache.get("10_6_20240101120000").as_deref(),
            Some("{click: {}, conversion: {PURCHASE: 1}}")
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_writer_receives_period_times_multiplier_ttl() {
        let store = Arc::new(AggregateStore::default());
        let writer = Arc::new(FlakyWriter::new("none"));
        // period_secs: 30, ttl_multiplier: 2
        let task = make_task(store.clone(), writer.clone());

        store.increment("10", "5", "CLICK1");
        store.increment("10", "6", "INSTALL");
        task.export_cycle(noon_utc()).await;

        assert_eq!(
            writer.written(),
            vec![
                ("10_5_20240101120000".to_string(), 60),
                ("10_6_20240101120000".to_string(), 60),
            ]
        );
    }

    #[tokio::test]
    async fn test_write_failure_does_not_abort_siblings() {
        let store = Arc::new(AggregateStore::default());
        let writer = Arc::new(FlakyWriter::new("10"));
        let task = make_task(store.clone(), writer.clone());

        store.increment("10", "5", "CLICK1");
        store.increment("11", "5", "CLICK1");
        store.increment("12", "5", "INSTALL");

        let report = task.export_cycle(noon_utc()).await;

        assert_eq!(report.payloads, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.written, 2);

        assert_eq!(
            writer.written(),
            vec![
                ("11_5_20240101120000".to_string(), 60),
                ("12_5_20240101120000".to_string(), 60),
            ]
        );

        // Failed bucket is not retried on the next cycle
        assert!(task.export_cycle(noon_utc()).await.is_noop());
    }

    #[tokio::test]
    async fn test_stop_signal_is_raised_once() {
        let stop = StopSignal::new();
        assert!(!stop.is_stopped());
        assert!(stop.stop());
        assert!(!stop.stop());
        assert!(stop.is_stopped());

        // Permit left by stop() cuts the next sleep short, reported as a stop
        assert_eq!(stop.sleep(Duration::from_secs(3600)).await, Wake::Stopped);
    }

    #[tokio::test]
    async fn test_sleep_elapses_and_reports_stray_wakeup() {
        let stop = StopSignal::new();
        assert_eq!(stop.sleep(Duration::from_millis(10)).await, Wake::Elapsed);

        // A wake-up without the flag raised is an early continuation
        stop.wake.notify_one();
        assert_eq!(stop.sleep(Duration::from_secs(3600)).await, Wake::Interrupted);
    }

    #[tokio::test]
    async fn test_run_exits_after_stop() {
        let store = Arc::new(AggregateStore::default());
        let cache = Arc::new(MemoryCacheWriter::new());
        let stop = Arc::new(StopSignal::new());
        let config = AggregationConfig {
            period_secs: 3600,
            ..AggregationConfig::default()
        };
        store.increment("10", "5", "CLICK1");

        let task = ExportTask::new(store.clone(), cache.clone(), stop.clone(), &config);
        let handle = tokio::spawn(task.run());

        // First cycle runs immediately, then the loop sleeps for an hour
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.len(), 1);

        stop.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("export task did not stop")
            .unwrap();

        // No export after stop
        store.increment("10", "5", "CLICK1");
        assert_eq!(store.count("10", "5", "CLICK1"), Some(1));
    }
}
