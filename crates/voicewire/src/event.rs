//! The canonical in-memory message and the capability trait for typed
//! message shapes built on top of it.

use serde_json::{Map, Value};
use tokio_util::bytes::Bytes;

use crate::error::EventError;

/// A single protocol message: a type tag, an optional structured `data`
/// mapping, and an optional opaque binary payload (e.g. raw audio samples).
///
/// `data` and `payload` are independently optional; the type tag is always
/// present. Equality is structural. Note that an *empty* `data` map encodes
/// identically to an absent one (`data_length: 0` on the wire), so it decodes
/// back as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_type: String,
    data: Option<Map<String, Value>>,
    payload: Option<Bytes>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: None,
            payload: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref()
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Look up a field in `data`, if any data is present.
    pub fn data_field(&self, field: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(field))
    }

    /// Required string field, for `Eventable::from_event` implementations.
    pub fn require_str(&self, field: &str) -> Result<&str, EventError> {
        let value = self
            .data_field(field)
            .ok_or_else(|| EventError::MissingField {
                event_type: self.event_type.clone(),
                field: field.to_string(),
            })?;
        value.as_str().ok_or_else(|| EventError::InvalidField {
            event_type: self.event_type.clone(),
            field: field.to_string(),
            reason: format!("expected a string, got {value}"),
        })
    }

    pub fn into_parts(self) -> (String, Option<Map<String, Value>>, Option<Bytes>) {
        (self.event_type, self.data, self.payload)
    }
}

/// Capability implemented by every typed message shape.
///
/// This is the sole contract between the protocol core and the message
/// catalog layered on top of it: a shape knows which type tags it claims,
/// how to render itself as an [`Event`], and how to validate itself back out
/// of one.
pub trait Eventable: Sized {
    /// Does this shape claim the given event type tag?
    fn is_type(event_type: &str) -> bool;

    /// Render as a wire-ready [`Event`].
    fn to_event(&self) -> Event;

    /// Parse and validate from a received [`Event`].
    ///
    /// Fails with [`EventError`] when the event has the wrong type or its
    /// `data` lacks a required field.
    fn from_event(event: &Event) -> Result<Self, EventError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_is_structural() {
        let mut data = Map::new();
        data.insert("text".to_string(), json!("hello"));

        let a = Event::new("ping").with_data(data.clone());
        let b = Event::new("ping").with_data(data);

        assert_eq!(a, b);
        assert_ne!(a, Event::new("ping"));
        assert_ne!(a, Event::new("pong"));
    }

    #[test]
    fn data_and_payload_are_independent() {
        let bare = Event::new("played");
        assert!(bare.data().is_none());
        assert!(bare.payload().is_none());

        let with_payload = Event::new("audio-chunk").with_payload(vec![0u8, 1, 2]);
        assert!(with_payload.data().is_none());
        assert_eq!(with_payload.payload().unwrap().as_ref(), &[0u8, 1, 2]);
    }

    #[test]
    fn require_str_reports_missing_and_invalid() {
        let mut data = Map::new();
        data.insert("count".to_string(), json!(3));
        let event = Event::new("test").with_data(data);

        assert_eq!(
            event.require_str("text"),
            Err(EventError::MissingField {
                event_type: "test".to_string(),
                field: "text".to_string(),
            })
        );
        assert!(matches!(
            event.require_str("count"),
            Err(EventError::InvalidField { .. })
        ));
    }
}
