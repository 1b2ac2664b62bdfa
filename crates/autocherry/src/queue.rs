//! Queue message ingest.
//!
//! Queue consumers receive either an API-Gateway style envelope
//! (`{"headers": {...}, "body": ...}`) or the bare GitHub payload. Both are
//! turned into a [`Delivery`] whose body is byte-for-byte what GitHub signed.

use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::EnvelopeError;
use crate::router::Delivery;
use crate::webhooks::{DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    body: Option<Box<RawValue>>,
}

/// Parse a queue message into a delivery.
pub fn parse_message(message: &[u8]) -> Result<Delivery, EnvelopeError> {
    let trimmed = message.trim_ascii();
    if trimmed.is_empty() {
        return Err(EnvelopeError::Empty);
    }

    let envelope: Option<Envelope> = serde_json::from_slice(trimmed).ok();
    let Some(envelope) = envelope.filter(|e| e.headers.is_some() || e.body.is_some()) else {
        return Ok(Delivery {
            event: detect_event(trimmed)?.to_string(),
            delivery_id: String::new(),
            signature: String::new(),
            body: trimmed.to_vec(),
        });
    };

    let payload = match envelope.body {
        // A string body carries the payload text verbatim
        Some(raw) if raw.get().starts_with('"') => {
            serde_json::from_str::<String>(raw.get())?.into_bytes()
        }
        Some(raw) => raw.get().as_bytes().to_vec(),
        None => Vec::new(),
    };

    let headers = envelope.headers.unwrap_or_default();
    let event = match header(&headers, EVENT_HEADER) {
        Some(event) => event,
        None => detect_event(&payload)?.to_string(),
    };

    Ok(Delivery {
        event,
        delivery_id: header(&headers, DELIVERY_HEADER).unwrap_or_default(),
        signature: header(&headers, SIGNATURE_HEADER).unwrap_or_default(),
        body: payload,
    })
}

/// Case-insensitive, trimmed, non-empty header value.
fn header(headers: &HashMap<String, String>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Infer the event type from the payload's top-level keys.
pub fn detect_event(payload: &[u8]) -> Result<&'static str, EnvelopeError> {
    let fields: Map<String, Value> = serde_json::from_slice(payload)?;

    if fields.contains_key("pull_request") {
        return Ok("pull_request");
    }
    if matches!(fields.get("ref_type"), Some(Value::String(s)) if !s.is_empty()) {
        return Ok("create");
    }
    if fields.contains_key("label") && fields.contains_key("action") {
        return Ok("label");
    }
    Err(EnvelopeError::UnknownEvent)
}
