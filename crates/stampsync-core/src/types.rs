//! Core types for StampSync

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::codec::Payload;

/// Free-form host settings, passed through unmodified
pub type Settings = serde_json::Map<String, Value>;

/// A quick-action button owned by the host's button store
///
/// The companion only ever holds a read-only cached copy. The serde form is
/// the wire form: `{id, name, color}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonAction {
    /// Unique identifier, assigned by the host or generated on decode
    #[serde(default = "generate_id")]
    pub id: String,
    /// Label shown on the button
    pub name: String,
    /// Free-form color tag (not validated against a fixed set)
    pub color: String,
}

fn generate_id() -> String {
    Ulid::new().to_string()
}

impl ButtonAction {
    /// Create a new button with a freshly generated id
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self::with_id(generate_id(), name, color)
    }

    /// Create a button with an explicit id
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: color.into(),
        }
    }

    /// Decode a button from a wire map.
    ///
    /// Returns `None` when `name` or `color` is missing or not a string.
    /// A missing `id` is replaced with a generated one.
    pub fn from_payload(map: &Payload) -> Option<Self> {
        serde_json::from_value(Value::Object(map.clone())).ok()
    }

    /// Decode a list of buttons, silently skipping malformed entries
    pub fn list_from_value(value: &Value) -> Option<Vec<Self>> {
        let items = value.as_array()?;
        Some(
            items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(Self::from_payload)
                .collect(),
        )
    }

    /// Encode a list of buttons as a wire array
    pub fn list_to_value(buttons: &[Self]) -> Value {
        // String-only structs always serialize
        serde_json::to_value(buttons).unwrap_or_else(|_| Value::Array(Vec::new()))
    }
}

/// Time value displayed on the companion
///
/// Recomputed by the host on every request; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSnapshot {
    /// Preformatted display string (e.g. `14:03:27`)
    pub display_value: String,
    /// `true` for wall-clock time, `false` for elapsed time
    pub is_absolute: bool,
}

impl TimeSnapshot {
    pub fn new(display_value: impl Into<String>, is_absolute: bool) -> Self {
        Self {
            display_value: display_value.into(),
            is_absolute,
        }
    }
}

/// An event captured by a button press, consumed once by the host's event sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
    pub button_name: String,
    pub color: String,
}

impl CapturedEvent {
    pub fn new(button_name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            button_name: button_name.into(),
            color: color.into(),
        }
    }
}

/// Full-state snapshot pushed from host to companion out of band
///
/// Buttons and settings travel together so the companion never sees a torn
/// read. A received context always replaces the companion's button cache.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncContext {
    pub buttons: Vec<ButtonAction>,
    pub settings: Settings,
    /// Epoch seconds at which the snapshot was taken
    pub timestamp: f64,
}

impl SyncContext {
    /// Build a context stamped with the current time
    pub fn new(buttons: Vec<ButtonAction>, settings: Settings) -> Self {
        Self {
            buttons,
            settings,
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }
}
