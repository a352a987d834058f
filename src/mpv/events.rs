//! Event side of the mpv IPC connection.

use crate::host::{EventSource, HostError, HostEvent};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Observed so idle is reported even by players that no longer emit the
/// legacy "idle" event.
pub const IDLE_ACTIVE_PROPERTY: &str = "idle-active";

/// Any line mpv writes: either an event or a reply to a request.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct IpcMessage {
    pub event: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub error: Option<String>,
    pub request_id: Option<u64>,
}

pub(crate) enum Incoming {
    Event(HostEvent),
    Closed,
}

/// Maps an mpv event onto a lifecycle event. Property changes other than idle
/// entry are dropped.
pub(crate) fn parse_event(message: &IpcMessage) -> Option<HostEvent> {
    let name = message.event.as_deref()?;
    match name {
        "file-loaded" => Some(HostEvent::FileLoaded),
        "idle" => Some(HostEvent::Idle),
        "shutdown" => Some(HostEvent::Shutdown),
        "property-change" => {
            let idle = message.name.as_deref() == Some(IDLE_ACTIVE_PROPERTY) && message.data == Value::Bool(true);
            idle.then_some(HostEvent::Idle)
        }
        other => Some(HostEvent::Other(other.to_string())),
    }
}

/// Blocking event feed for the dispatcher thread.
pub struct MpvEvents {
    rx: UnboundedReceiver<Incoming>,
    tx: UnboundedSender<Incoming>,
    closed: bool,
}

impl MpvEvents {
    pub(crate) fn new(rx: UnboundedReceiver<Incoming>, tx: UnboundedSender<Incoming>) -> Self {
        Self { rx, tx, closed: false }
    }

    /// Handle that can queue a shutdown from another task (e.g. on Ctrl-C).
    pub fn injector(&self) -> EventInjector {
        EventInjector { tx: self.tx.clone() }
    }
}

impl EventSource for MpvEvents {
    /// Must not be called from inside the async runtime.
    fn wait_event(&mut self) -> Result<Option<HostEvent>, HostError> {
        if self.closed {
            return Err(HostError::Disconnected);
        }
        match self.rx.blocking_recv() {
            Some(Incoming::Event(event)) => Ok(Some(event)),
            Some(Incoming::Closed) | None => {
                self.closed = true;
                Err(HostError::Disconnected)
            }
        }
    }
}

#[derive(Clone)]
pub struct EventInjector {
    tx: UnboundedSender<Incoming>,
}

impl EventInjector {
    pub fn shutdown(&self) {
        let _ = self.tx.send(Incoming::Event(HostEvent::Shutdown));
    }
}
