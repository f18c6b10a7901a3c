//! Host/companion sync protocol
//!
//! Shared, declarative catalog used by both the host controller and the
//! companion client.
//!
//! ## Message Flow
//!
//! ```text
//! Companion                              Host
//!   |                                      |
//!   |--- {action: requestButtons} -------->|
//!   |<-- {buttons: [{id,name,color}]} -----|
//!   |                                      |
//!   |--- {action: requestCurrentTime} ---->|   every second
//!   |<-- {currentTime, isAbsolute} --------|
//!   |                                      |
//!   |--- {action: captureEvent, ...} ----->|
//!   |<-- {success: true} ------------------|
//!   |                                      |
//!   |<== context {buttons, settings, ts} ==|   out of band, last-write-wins
//!   |<-- {currentTime?, isAbsolute?} ------|   direct push, no reply
//! ```

use serde_json::Value;

use crate::codec::{self, Payload};
use crate::error::{SyncError, SyncResult};
use crate::types::{ButtonAction, CapturedEvent, Settings, SyncContext, TimeSnapshot};

/// Wire field names
pub mod fields {
    pub const ACTION: &str = "action";
    pub const BUTTONS: &str = "buttons";
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const COLOR: &str = "color";
    pub const CURRENT_TIME: &str = "currentTime";
    pub const IS_ABSOLUTE: &str = "isAbsolute";
    pub const BUTTON_NAME: &str = "buttonName";
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
    pub const SETTINGS: &str = "settings";
    pub const TIMESTAMP: &str = "timestamp";
}

/// Error string sent back for unrecognized actions
pub const UNKNOWN_ACTION_ERROR: &str = "unknown action";

/// Error string sent back when the host's time source fails
pub const TIME_UNAVAILABLE_ERROR: &str = "failed to get time";

/// Request actions understood by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    RequestButtons,
    RequestCurrentTime,
    CaptureEvent,
}

impl Action {
    pub const ALL: [Action; 3] = [
        Action::RequestButtons,
        Action::RequestCurrentTime,
        Action::CaptureEvent,
    ];

    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::RequestButtons => "requestButtons",
            Action::RequestCurrentTime => "requestCurrentTime",
            Action::CaptureEvent => "captureEvent",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }

    /// Fields a request must carry besides `action`
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Action::RequestButtons | Action::RequestCurrentTime => &[],
            Action::CaptureEvent => &[fields::BUTTON_NAME, fields::COLOR],
        }
    }

    /// Fields the host's reply carries
    pub fn reply_fields(&self) -> &'static [&'static str] {
        match self {
            Action::RequestButtons => &[fields::BUTTONS],
            Action::RequestCurrentTime => &[fields::CURRENT_TIME, fields::IS_ABSOLUTE],
            Action::CaptureEvent => &[fields::SUCCESS],
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded request as seen by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    RequestButtons,
    RequestCurrentTime,
    CaptureEvent(CapturedEvent),
    /// Action name the host does not recognize
    Unknown(String),
}

impl Request {
    pub fn capture(button_name: impl Into<String>, color: impl Into<String>) -> Self {
        Request::CaptureEvent(CapturedEvent::new(button_name, color))
    }

    pub fn encode(&self) -> Payload {
        match self {
            Request::RequestButtons => codec::encode(Action::RequestButtons.as_str(), Payload::new()),
            Request::RequestCurrentTime => {
                codec::encode(Action::RequestCurrentTime.as_str(), Payload::new())
            }
            Request::CaptureEvent(event) => {
                let mut extra = Payload::new();
                extra.insert(fields::BUTTON_NAME.into(), Value::String(event.button_name.clone()));
                extra.insert(fields::COLOR.into(), Value::String(event.color.clone()));
                codec::encode(Action::CaptureEvent.as_str(), extra)
            }
            Request::Unknown(action) => codec::encode(action, Payload::new()),
        }
    }

    /// Decode and validate a request payload.
    ///
    /// Unknown action names decode successfully to [`Request::Unknown`] so
    /// the host can answer them; a missing action or missing required
    /// fields fail with [`SyncError::DecodeInvalid`].
    pub fn decode(payload: &Payload) -> SyncResult<Self> {
        let (name, rest) = codec::decode(payload)?;
        let Some(action) = Action::parse(&name) else {
            return Ok(Request::Unknown(name));
        };

        match action {
            Action::RequestButtons => Ok(Request::RequestButtons),
            Action::RequestCurrentTime => Ok(Request::RequestCurrentTime),
            Action::CaptureEvent => {
                let button_name = codec::require_str(&rest, fields::BUTTON_NAME)?;
                let color = codec::require_str(&rest, fields::COLOR)?;
                Ok(Request::capture(button_name, color))
            }
        }
    }

    pub fn action_name(&self) -> &str {
        match self {
            Request::RequestButtons => Action::RequestButtons.as_str(),
            Request::RequestCurrentTime => Action::RequestCurrentTime.as_str(),
            Request::CaptureEvent(_) => Action::CaptureEvent.as_str(),
            Request::Unknown(name) => name,
        }
    }
}

/// A reply produced by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Buttons(Vec<ButtonAction>),
    CurrentTime(TimeSnapshot),
    Captured { success: bool },
    Error(String),
}

impl Reply {
    pub fn encode(&self) -> Payload {
        let mut payload = Payload::new();
        match self {
            Reply::Buttons(buttons) => {
                payload.insert(fields::BUTTONS.into(), ButtonAction::list_to_value(buttons));
            }
            Reply::CurrentTime(snapshot) => {
                payload = TimeUpdate::from(snapshot.clone()).encode();
            }
            Reply::Captured { success } => {
                payload.insert(fields::SUCCESS.into(), Value::Bool(*success));
            }
            Reply::Error(message) => {
                payload.insert(fields::ERROR.into(), Value::String(message.clone()));
            }
        }
        payload
    }
}

/// Buttons carried by a `requestButtons` reply, if the field is present
pub fn reply_buttons(payload: &Payload) -> Option<Vec<ButtonAction>> {
    payload.get(fields::BUTTONS).and_then(ButtonAction::list_from_value)
}

/// `success` flag of a `captureEvent` reply, defaulting to `false`
pub fn reply_success(payload: &Payload) -> bool {
    codec::optional_bool(payload, fields::SUCCESS).unwrap_or(false)
}

/// `error` string of a reply, if any
pub fn reply_error(payload: &Payload) -> Option<&str> {
    codec::optional_str(payload, fields::ERROR)
}

/// Time fields as carried by a time reply or a direct push
///
/// Either field may be absent; receivers apply each present field
/// independently and keep their cached value for the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeUpdate {
    pub current_time: Option<String>,
    pub is_absolute: Option<bool>,
}

impl TimeUpdate {
    pub fn from_payload(payload: &Payload) -> Self {
        Self {
            current_time: codec::optional_str(payload, fields::CURRENT_TIME).map(str::to_string),
            is_absolute: codec::optional_bool(payload, fields::IS_ABSOLUTE),
        }
    }

    pub fn encode(&self) -> Payload {
        let mut payload = Payload::new();
        if let Some(time) = &self.current_time {
            payload.insert(fields::CURRENT_TIME.into(), Value::String(time.clone()));
        }
        if let Some(is_absolute) = self.is_absolute {
            payload.insert(fields::IS_ABSOLUTE.into(), Value::Bool(is_absolute));
        }
        payload
    }

    pub fn is_empty(&self) -> bool {
        self.current_time.is_none() && self.is_absolute.is_none()
    }
}

impl From<TimeSnapshot> for TimeUpdate {
    fn from(snapshot: TimeSnapshot) -> Self {
        Self {
            current_time: Some(snapshot.display_value),
            is_absolute: Some(snapshot.is_absolute),
        }
    }
}

impl SyncContext {
    pub fn encode(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert(fields::BUTTONS.into(), ButtonAction::list_to_value(&self.buttons));
        payload.insert(fields::SETTINGS.into(), Value::Object(self.settings.clone()));
        payload.insert(
            fields::TIMESTAMP.into(),
            serde_json::Number::from_f64(self.timestamp)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
        payload
    }

    /// Decode a context push.
    ///
    /// `buttons` must be a list (malformed entries are skipped). `settings`
    /// must be a map when present and defaults to empty; `timestamp`
    /// defaults to zero.
    pub fn decode(payload: &Payload) -> SyncResult<Self> {
        let buttons = payload
            .get(fields::BUTTONS)
            .and_then(ButtonAction::list_from_value)
            .ok_or_else(|| SyncError::DecodeInvalid("context without buttons list".to_string()))?;

        let settings = match payload.get(fields::SETTINGS) {
            None | Some(Value::Null) => Settings::new(),
            Some(Value::Object(settings)) => settings.clone(),
            Some(other) => {
                return Err(SyncError::DecodeInvalid(format!(
                    "context settings must be a map, got {}",
                    other
                )))
            }
        };

        let timestamp = payload
            .get(fields::TIMESTAMP)
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        Ok(Self {
            buttons,
            settings,
            timestamp,
        })
    }
}
