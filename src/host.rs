//! Interface the engine consumes from the media player: typed property reads and a
//! serial feed of lifecycle events.

use std::collections::BTreeMap;
use std::time::Duration;

/// A property value as exposed by the player.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Flag(bool),
    Int64(i64),
    Double(f64),
    String(String),
    Map(BTreeMap<String, PropertyValue>),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            PropertyValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view; integers are widened.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            PropertyValue::Double(v) => Some(*v),
            PropertyValue::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<BTreeMap<String, PropertyValue>> {
        match self {
            PropertyValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

/// Lifecycle events delivered by the player, one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    FileLoaded,
    Idle,
    Shutdown,
    /// Any event the engine does not act on.
    Other(String),
}

/// Errors that can occur while talking to the player
#[derive(thiserror::Error, Debug)]
pub enum HostError {
    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },
    #[error("property `{0}` has no usable value")]
    Unavailable(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection to the player is gone")]
    Disconnected,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed IPC message: {0}")]
    Json(#[from] serde_json::Error),
}

impl HostError {
    /// The player went away; nothing else can succeed after this.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HostError::Disconnected)
    }
}

/// Synchronous property access. Shared between the dispatcher and both workers.
pub trait PropertySource: Send + Sync {
    fn get_property(&self, name: &str) -> Result<PropertyValue, HostError>;

    /// Property rendered the way the player's on-screen display shows it.
    fn get_osd_string(&self, name: &str) -> Result<String, HostError>;
}

/// Blocking event feed. `Ok(None)` is an absent event and is ignored by callers.
pub trait EventSource {
    fn wait_event(&mut self) -> Result<Option<HostEvent>, HostError>;
}

/// Best-effort flag read; failures are swallowed.
pub fn read_flag<P: PropertySource + ?Sized>(props: &P, name: &str) -> Option<bool> {
    match props.get_property(name) {
        Ok(value) => value.as_flag(),
        Err(e) => {
            tracing::trace!(property = name, error = %e, "flag read failed");
            None
        }
    }
}

/// Best-effort numeric read; failures are swallowed.
pub fn read_double<P: PropertySource + ?Sized>(props: &P, name: &str) -> Option<f64> {
    match props.get_property(name) {
        Ok(value) => value.as_double(),
        Err(e) => {
            tracing::trace!(property = name, error = %e, "numeric read failed");
            None
        }
    }
}

/// Best-effort OSD string read; a failed read yields an empty string.
pub fn read_osd_string<P: PropertySource + ?Sized>(props: &P, name: &str) -> String {
    props.get_osd_string(name).unwrap_or_else(|e| {
        tracing::trace!(property = name, error = %e, "OSD string read failed");
        String::new()
    })
}
