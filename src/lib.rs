//! Click/conversion aggregation stage
//!
//! Consumes offer/affiliate event records, keeps running counts per
//! (offer, affiliate, event code) and periodically exports them to a TTL
//! cache, bucketed by UTC+8 time.

pub mod pipeline;
