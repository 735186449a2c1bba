//! Ping/pong liveness messages.

use serde_json::{Value, json};

use crate::error::EventError;
use crate::event::{Event, Eventable};

const PING_TYPE: &str = "ping";
const PONG_TYPE: &str = "pong";

/// Request a [`Pong`], optionally carrying text to be echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ping {
    pub text: Option<String>,
}

impl Eventable for Ping {
    fn is_type(event_type: &str) -> bool {
        event_type == PING_TYPE
    }

    fn to_event(&self) -> Event {
        let mut data = serde_json::Map::new();
        data.insert("text".to_string(), json!(self.text));
        Event::new(PING_TYPE).with_data(data)
    }

    fn from_event(event: &Event) -> Result<Self, EventError> {
        if !Self::is_type(event.event_type()) {
            return Err(EventError::WrongType {
                expected: PING_TYPE.to_string(),
                actual: event.event_type().to_string(),
            });
        }
        Ok(Self {
            text: optional_text(event),
        })
    }
}

/// Response to a [`Ping`], echoing its text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pong {
    pub text: Option<String>,
}

impl Eventable for Pong {
    fn is_type(event_type: &str) -> bool {
        event_type == PONG_TYPE
    }

    fn to_event(&self) -> Event {
        let mut data = serde_json::Map::new();
        data.insert("text".to_string(), json!(self.text));
        Event::new(PONG_TYPE).with_data(data)
    }

    fn from_event(event: &Event) -> Result<Self, EventError> {
        if !Self::is_type(event.event_type()) {
            return Err(EventError::WrongType {
                expected: PONG_TYPE.to_string(),
                actual: event.event_type().to_string(),
            });
        }
        Ok(Self {
            text: optional_text(event),
        })
    }
}

fn optional_text(event: &Event) -> Option<String> {
    event
        .data_field("text")
        .and_then(Value::as_str)
        .map(str::to_string)
}
