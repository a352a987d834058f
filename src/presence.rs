//! Outbound side: the payload pushed each tick and the sink that receives it.

use serde::Deserialize;

/// Fixed-shape presence payload. Length limits are enforced by the sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presence {
    /// Status line (playback state and position).
    pub details: String,
    /// Subject line (song or filename).
    pub state: String,
    pub large_image_key: String,
    pub large_image_text: String,
    pub small_image_key: Option<String>,
    pub small_image_text: Option<String>,
}

/// Account the sink connected as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SinkUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
}

impl SinkUser {
    /// `name#1234` for legacy accounts, plain username otherwise.
    pub fn display_name(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }
}

/// Notification queued by a sink until the next `run_callbacks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Ready(SinkUser),
    Disconnected { code: i32, message: String },
    Errored { code: i32, message: String },
}

type UserHandler = Box<dyn Fn(&SinkUser) + Send>;
type StatusHandler = Box<dyn Fn(i32, &str) + Send>;

/// Handlers registered at init and invoked from `run_callbacks`.
pub struct SinkHandlers {
    pub ready: UserHandler,
    pub disconnected: StatusHandler,
    pub errored: StatusHandler,
}

impl SinkHandlers {
    pub fn dispatch(&self, event: &SinkEvent) {
        match event {
            SinkEvent::Ready(user) => (self.ready)(user),
            SinkEvent::Disconnected { code, message } => (self.disconnected)(*code, message),
            SinkEvent::Errored { code, message } => (self.errored)(*code, message),
        }
    }
}

impl Default for SinkHandlers {
    fn default() -> Self {
        Self {
            ready: Box::new(|_| {}),
            disconnected: Box::new(|_, _| {}),
            errored: Box::new(|_, _| {}),
        }
    }
}

/// External presence service. Updates are fire-and-forget.
pub trait PresenceSink: Send {
    /// Connects to the service. Called once per process.
    fn init(&mut self, application_id: &str, handlers: SinkHandlers);

    fn update_presence(&mut self, presence: &Presence);

    /// Delivers queued notifications to the registered handlers on the caller's thread.
    fn run_callbacks(&mut self);

    /// Tears the connection down. Called once, after all workers stopped.
    fn shutdown(&mut self);
}
