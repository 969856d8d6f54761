//! Aggregate store: running counts keyed by (offer, affiliate, event code)
//!
//! ## Cut-over protocol
//!
//! The live counters sit behind an [`ArcSwap`]. Ingestion loads a full `Arc`
//! to the current instance, bumps one counter and drops the `Arc`; it never
//! waits on the exporter.
//!
//! [`AggregateStore::swap`] installs a fresh instance and then spins (yielding
//! the thread) until it holds the only reference to the detached one. An
//! increment that loaded the old instance before the swap finishes inside it
//! and is part of the snapshot. An increment that loads after the swap lands
//! in the new instance. Nothing is counted twice or dropped.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// event_code → count
pub type EventCounts = HashMap<String, u64>;

/// Live counters: offer_id → affiliate_id → event_code → count
///
/// The two outer levels are sharded maps so that concurrent callers only
/// contend on the shard they touch. The innermost map is guarded by the
/// affiliate-level shard lock held while it is mutated.
#[derive(Debug, Default)]
struct Counters {
    offers: DashMap<String, DashMap<String, EventCounts>>,
}

impl Counters {
    fn bump(&self, offer_id: &str, affiliate_id: &str, event_code: &str, base: u64, step: u64) {
        let affiliates = self.offers.entry(offer_id.to_string()).or_default();
        let mut events = affiliates.entry(affiliate_id.to_string()).or_default();
        events
            .entry(event_code.to_string())
            .and_modify(|count| *count = count.saturating_add(step))
            .or_insert(base);
    }

    fn get(&self, offer_id: &str, affiliate_id: &str, event_code: &str) -> Option<u64> {
        let affiliates = self.offers.get(offer_id)?;
        let events = affiliates.get(affiliate_id)?;
        events.get(event_code).copied()
    }

    fn into_snapshot(self) -> Snapshot {
        let offers = self
            .offers
            .into_iter()
            .map(|(offer_id, affiliates)| (offer_id, affiliates.into_iter().collect()))
            .collect();
        Snapshot { offers }
    }
}

/// Detached counters, exclusively owned by the exporter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    offers: HashMap<String, HashMap<String, EventCounts>>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    pub fn count(&self, offer_id: &str, affiliate_id: &str, event_code: &str) -> Option<u64> {
        self.offers
            .get(offer_id)?
            .get(affiliate_id)?
            .get(event_code)
            .copied()
    }

    /// Number of (offer, affiliate) pairs, i.e. export payloads.
    pub fn pair_count(&self) -> usize {
        self.offers.values().map(|affiliates| affiliates.len()).sum()
    }

    /// Sum of every counter in the snapshot.
    pub fn total(&self) -> u64 {
        self.iter()
            .flat_map(|(_, _, events)| events.values())
            .fold(0u64, |acc, count| acc.saturating_add(*count))
    }

    /// Iterate `(offer_id, affiliate_id, event counts)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &EventCounts)> + '_ {
        self.offers.iter().flat_map(|(offer_id, affiliates)| {
            affiliates
                .iter()
                .map(move |(affiliate_id, events)| (offer_id.as_str(), affiliate_id.as_str(), events))
        })
    }
}

/// Swappable aggregate of click/conversion counters
pub struct AggregateStore {
    current: ArcSwap<Counters>,
    base: u64,
    step: u64,
}

impl AggregateStore {
    /// `base` is stored on first sight of a triple, `step` is added on every
    /// later occurrence.
    pub fn new(base: u64, step: u64) -> Self {
        Self {
            current: ArcSwap::from_pointee(Counters::default()),
            base,
            step,
        }
    }

    pub fn increment(&self, offer_id: &str, affiliate_id: &str, event_code: &str) {
        let counters = self.current.load_full();
        counters.bump(offer_id, affiliate_id, event_code, self.base, self.step);
    }

    /// Install an empty store and return the previous one, detached.
    ///
    /// Returns only once every increment still running against the old
    /// instance has completed.
    pub fn swap(&self) -> Snapshot {
        let mut detached = self.current.swap(Arc::new(Counters::default()));
        let counters = loop {
            match Arc::try_unwrap(detached) {
                Ok(counters) => break counters,
                Err(shared) => {
                    detached = shared;
                    std::thread::yield_now();
                }
            }
        };
        counters.into_snapshot()
    }

    /// Current count for a triple, without detaching anything.
    pub fn count(&self, offer_id: &str, affiliate_id: &str, event_code: &str) -> Option<u64> {
        self.current.load().get(offer_id, affiliate_id, event_code)
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().offers.is_empty()
    }
}

impl Default for AggregateStore {
    fn default() -> Self {
        Self::new(1, 1)
    }
}
