//! Record parser: raw broker body → typed [`Record`]

use super::error::DecodeError;
use super::types::Record;
use serde::Deserialize;
use serde_json::Value;

pub trait RecordParser: Send + Sync {
    fn parse(&self, body: &[u8]) -> Result<Record, DecodeError>;
}

/// UTF-8 JSON parser for click/conversion log lines
///
/// Unknown fields are ignored. Numeric ids are accepted and kept in their
/// decimal string form, so `{"offer_id": 10}` and `{"offer_id": "10"}`
/// aggregate under the same key.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRecordParser;

#[derive(Deserialize)]
struct RawRecord {
    offer_id: Value,
    affiliate_id: Value,
    event_code: Value,
}

impl RecordParser for JsonRecordParser {
    fn parse(&self, body: &[u8]) -> Result<Record, DecodeError> {
        let text = std::str::from_utf8(body)?;
        let raw: RawRecord = serde_json::from_str(text)?;

        Ok(Record {
            offer_id: field_text("offer_id", raw.offer_id)?,
            affiliate_id: field_text("affiliate_id", raw.affiliate_id)?,
            event_code: field_text("event_code", raw.event_code)?,
        })
    }
}

fn field_text(field: &'static str, value: Value) -> Result<String, DecodeError> {
    let text = match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        // `null` reads as a missing value
        Value::Null => String::new(),
        _ => return Err(DecodeError::InvalidField(field)),
    };

    // Blank values are rejected, but kept verbatim otherwise
    if text.trim().is_empty() {
        return Err(DecodeError::EmptyField(field));
    }
    Ok(text)
}
