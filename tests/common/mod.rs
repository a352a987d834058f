#![allow(dead_code)]

use mpv_presence::Config;
use mpv_presence::host::{EventSource, HostError, HostEvent, PropertySource, PropertyValue};
use mpv_presence::presence::{Presence, PresenceSink, SinkHandlers};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// In-memory player whose properties can be changed while workers read them.
#[derive(Default)]
pub struct FakeHost {
    props: Mutex<HashMap<String, PropertyValue>>,
    osd: Mutex<HashMap<String, String>>,
    disconnected: Mutex<bool>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        let host = Arc::new(Self::default());
        host.set("pause", PropertyValue::Flag(false));
        host.set("paused-for-cache", PropertyValue::Flag(false));
        host.set("speed", PropertyValue::Double(1.0));
        host.set_osd("time-pos", "00:00:01");
        host.set_osd("duration", "00:03:00");
        host
    }

    pub fn set(&self, name: &str, value: PropertyValue) {
        self.props.lock().unwrap().insert(name.to_string(), value);
    }

    pub fn set_osd(&self, name: &str, value: &str) {
        self.osd.lock().unwrap().insert(name.to_string(), value.to_string());
    }

    pub fn load_track(&self, artist: &str, title: &str, filename: &str) {
        let mut metadata = std::collections::BTreeMap::new();
        if !artist.is_empty() {
            metadata.insert("artist".to_string(), PropertyValue::String(artist.to_string()));
        }
        if !title.is_empty() {
            metadata.insert("title".to_string(), PropertyValue::String(title.to_string()));
        }
        self.set("metadata", PropertyValue::Map(metadata));
        self.set_osd("filename", filename);
    }

    pub fn disconnect(&self) {
        *self.disconnected.lock().unwrap() = true;
    }

    fn check(&self) -> Result<(), HostError> {
        if *self.disconnected.lock().unwrap() {
            return Err(HostError::Disconnected);
        }
        Ok(())
    }
}

impl PropertySource for FakeHost {
    fn get_property(&self, name: &str) -> Result<PropertyValue, HostError> {
        self.check()?;
        self.props
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::Unavailable(name.to_string()))
    }

    fn get_osd_string(&self, name: &str) -> Result<String, HostError> {
        self.check()?;
        Ok(self.osd.lock().unwrap().get(name).cloned().unwrap_or_default())
    }
}

/// Plays back a fixed script, then reports the host gone.
pub struct ScriptedEvents(VecDeque<Result<Option<HostEvent>, HostError>>);

impl ScriptedEvents {
    pub fn new(script: impl IntoIterator<Item = Result<Option<HostEvent>, HostError>>) -> Self {
        Self(script.into_iter().collect())
    }
}

impl EventSource for ScriptedEvents {
    fn wait_event(&mut self) -> Result<Option<HostEvent>, HostError> {
        self.0.pop_front().unwrap_or(Err(HostError::Disconnected))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Init(String),
    Update(Presence),
    Shutdown,
}

/// Sink that records every call it receives.
#[derive(Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn updates_since(&self, start: usize) -> Vec<Presence> {
        self.calls()
            .into_iter()
            .skip(start)
            .filter_map(|call| match call {
                SinkCall::Update(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn init_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Init(_)))
            .count()
    }

    pub fn shutdown_count(&self) -> usize {
        self.calls().iter().filter(|c| **c == SinkCall::Shutdown).count()
    }
}

impl PresenceSink for RecordingSink {
    fn init(&mut self, application_id: &str, _handlers: SinkHandlers) {
        self.calls.lock().unwrap().push(SinkCall::Init(application_id.to_string()));
    }

    fn update_presence(&mut self, presence: &Presence) {
        self.calls.lock().unwrap().push(SinkCall::Update(presence.clone()));
    }

    fn run_callbacks(&mut self) {}

    fn shutdown(&mut self) {
        self.calls.lock().unwrap().push(SinkCall::Shutdown);
    }
}

pub fn fast_config() -> Config {
    Config {
        poll_interval_ms: 5,
        push_interval_ms: 5,
        ..Config::default()
    }
}

/// Polls `cond` until it holds or two seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
