//! Core data types shared by the ingestion path and the export task

use serde::{Deserialize, Serialize};

/// One ingested click/conversion event
///
/// Produced by a [`RecordParser`](super::parser::RecordParser) from the raw
/// broker body. All three identifiers are guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub offer_id: String,
    pub affiliate_id: String,
    pub event_code: String,
}

/// Event category, decided solely by the event-code prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Click,
    Conversion,
}

impl EventCategory {
    /// Codes starting with `C` are clicks, everything else is a conversion.
    pub fn of(event_code: &str) -> Self {
        if event_code.starts_with('C') {
            EventCategory::Click
        } else {
            EventCategory::Conversion
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Click => "click",
            EventCategory::Conversion => "conversion",
        }
    }
}

/// Message body as delivered by the upstream broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub msg_id: String,
    pub topic: String,
    pub body: Vec<u8>,
}

/// Delivery metadata that travels next to the broker message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStat {
    pub queue_id: u32,
    pub queue_offset: u64,
    pub reconsume_times: u32,
}

/// One positional value carried by an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleValue {
    Message(BrokerMessage),
    Stat(DeliveryStat),
    Raw(Vec<u8>),
}

impl TupleValue {
    pub fn kind(&self) -> &'static str {
        match self {
            TupleValue::Message(_) => "message",
            TupleValue::Stat(_) => "stat",
            TupleValue::Raw(_) => "raw",
        }
    }
}

/// Inbound unit of work handed over by the message source
///
/// The expected shape is `[Message, Stat]`: payload object first, payload
/// metadata second. Anything else is failed back to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: u64,
    pub values: Vec<TupleValue>,
}

impl InboundMessage {
    /// Build a well-shaped message around a raw body.
    pub fn from_body(id: u64, topic: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            values: vec![
                TupleValue::Message(BrokerMessage {
                    msg_id: id.to_string(),
                    topic: topic.to_string(),
                    body: body.into(),
                }),
                TupleValue::Stat(DeliveryStat::default()),
            ],
        }
    }

    /// The broker message in the payload position, if present.
    pub fn payload(&self) -> Option<&BrokerMessage> {
        match self.values.first() {
            Some(TupleValue::Message(msg)) => Some(msg),
            _ => None,
        }
    }

    pub fn stat(&self) -> Option<&DeliveryStat> {
        match self.values.get(1) {
            Some(TupleValue::Stat(stat)) => Some(stat),
            _ => None,
        }
    }
}

/// Upstream acknowledgement callbacks
///
/// Exactly one of `ack` / `fail` is invoked per inbound message.
pub trait Acknowledger: Send + Sync {
    fn ack(&self, message: &InboundMessage);
    fn fail(&self, message: &InboundMessage);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_category_prefix_rule() {
        assert_eq!(EventCategory::of("CLICK1"), EventCategory::Click);
        assert_eq!(EventCategory::of("C"), EventCategory::Click);
        // Any leading `C` counts, even for codes named like conversions
        assert_eq!(EventCategory::of("CONV1"), EventCategory::Click);
        assert_eq!(EventCategory::of("INSTALL"), EventCategory::Conversion);
        // Prefix match is case-sensitive
        assert_eq!(EventCategory::of("click"), EventCategory::Conversion);
        assert_eq!(EventCategory::of(""), EventCategory::Conversion);
    }

    #[test]
    fn test_inbound_message_shape_accessors() {
        let msg = InboundMessage::from_body(7, "cr_log", b"{}".to_vec());
        assert_eq!(msg.payload().map(|m| m.msg_id.as_str()), Some("7"));
        assert!(msg.stat().is_some());

        let wrong = InboundMessage {
            id: 8,
            values: vec![TupleValue::Raw(b"{}".to_vec())],
        };
        assert!(wrong.payload().is_none());
        assert!(wrong.stat().is_none());
    }
}
