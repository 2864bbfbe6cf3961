//! Push frames translated into state-change events.
//!
//! The gateway announces changes by pushing a frame such as
//! `PUT /devices/data HTTP/1.1` whose body lists the entities that changed.
//! Subscribers do not care about the frame layout; they receive a
//! [`StateEvent`] naming the kind of change and the ids involved.

use serde_json::Value;

use super::frame::{Body, ParsedFrame};

/// Event name used when a push frame carries no resource path.
pub const GENERIC_EVENT: &str = "state_changed";

/// A decoded push notification.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    /// Event name, e.g. `devices_changed` for a push on `/devices/data`.
    pub name: String,
    /// Ids of the entities listed in the body.
    pub changed_ids: Vec<u64>,
    /// Full decoded body for subscribers that need the values.
    pub body: Body,
}

impl StateEvent {
    /// Builds the event for a push frame.
    pub fn from_frame(frame: &ParsedFrame) -> Self {
        let name = frame
            .path()
            .map(event_name_for_path)
            .unwrap_or_else(|| GENERIC_EVENT.to_string());
        let changed_ids = frame.body.as_json().map(changed_ids).unwrap_or_default();
        Self {
            name,
            changed_ids,
            body: frame.body.clone(),
        }
    }

    /// Returns `true` when the event passes `filter` (an empty filter passes all).
    pub fn matches(&self, filter: &[String]) -> bool {
        filter.is_empty() || filter.iter().any(|f| f == &self.name)
    }
}

/// Derives an event name from a resource path.
///
/// ```rust
/// use tydom_core::protocol::event::event_name_for_path;
///
/// assert_eq!(event_name_for_path("/devices/data"), "devices_changed");
/// assert_eq!(event_name_for_path("/zones/12/data"), "zones_changed");
/// ```
pub fn event_name_for_path(path: &str) -> String {
    let resource = path
        .split('?')
        .next()
        .unwrap_or_default()
        .split('/')
        .find(|segment| !segment.is_empty());
    match resource {
        Some(segment) => format!("{segment}_changed"),
        None => GENERIC_EVENT.to_string(),
    }
}

fn changed_ids(value: &Value) -> Vec<u64> {
    match value {
        Value::Array(items) => items.iter().filter_map(entity_id).collect(),
        Value::Object(_) => entity_id(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn entity_id(value: &Value) -> Option<u64> {
    value.get("id").and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::decode_frame;
    use serde_json::json;

    #[test]
    fn test_event_from_device_push_lists_ids() {
        // Arrange
        let raw = "PUT /devices/data HTTP/1.1\r\nContent-Type: application/json\r\n\r\n\
                   [{\"id\":1612345678,\"endpoints\":[]},{\"id\":1612345679,\"endpoints\":[]}]";
        let frame = decode_frame(raw.as_bytes()).unwrap();

        // Act
        let event = StateEvent::from_frame(&frame);

        // Assert
        assert_eq!(event.name, "devices_changed");
        assert_eq!(event.changed_ids, vec![1_612_345_678, 1_612_345_679]);
    }

    #[test]
    fn test_event_without_path_is_generic() {
        let frame = decode_frame(b"HTTP/1.1 200 OK\r\n\r\n{\"id\":3}").unwrap();
        let event = StateEvent::from_frame(&frame);
        assert_eq!(event.name, GENERIC_EVENT);
        assert_eq!(event.changed_ids, vec![3]);
        assert_eq!(event.body, Body::Json(json!({ "id": 3 })));
    }

    #[test]
    fn test_event_filter_matching() {
        let event = StateEvent {
            name: "zones_changed".to_string(),
            changed_ids: vec![],
            body: Body::Empty,
        };
        assert!(event.matches(&[]));
        assert!(event.matches(&["zones_changed".to_string()]));
        assert!(!event.matches(&["outputs_changed".to_string()]));
    }

    #[test]
    fn test_event_name_for_root_path() {
        assert_eq!(event_name_for_path("/"), GENERIC_EVENT);
        assert_eq!(event_name_for_path("/areas/data?full=1"), "areas_changed");
    }
}
