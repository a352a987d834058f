//! Presence driver: renders the presence and ships it to the sink on an interval.

use crate::config::{Config, LARGE_IMAGE_KEY, LARGE_IMAGE_TEXT};
use crate::format::render_lines;
use crate::host::PropertySource;
use crate::interval::{IntervalTask, TaskError};
use crate::presence::{Presence, PresenceSink, SinkHandlers};
use crate::state::SharedState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub type SharedSink = Arc<Mutex<Box<dyn PresenceSink>>>;

/// Static parts of the payload and the sink identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSettings {
    pub application_id: String,
    pub large_image_key: String,
    pub large_image_text: String,
    pub show_state_icon: bool,
}

impl PresenceSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            application_id: cfg.app_id().to_string(),
            large_image_key: LARGE_IMAGE_KEY.to_string(),
            large_image_text: LARGE_IMAGE_TEXT.to_string(),
            show_state_icon: !cfg.no_state_icon,
        }
    }
}

pub fn build_presence<P: PropertySource + ?Sized>(
    props: &P,
    shared: &SharedState,
    settings: &PresenceSettings,
) -> Presence {
    let lines = render_lines(props, shared);
    let state = shared.player_state();
    let (small_image_key, small_image_text) = if settings.show_state_icon {
        (Some(state.icon_key().to_string()), Some(state.human().to_string()))
    } else {
        (None, None)
    };
    Presence {
        details: lines.status,
        state: lines.subject,
        large_image_key: settings.large_image_key.clone(),
        large_image_text: settings.large_image_text.clone(),
        small_image_key,
        small_image_text,
    }
}

/// One driver tick: push the current presence, then service sink callbacks.
pub fn push_tick<P: PropertySource + ?Sized>(
    props: &P,
    shared: &SharedState,
    settings: &PresenceSettings,
    sink: &SharedSink,
) {
    let presence = build_presence(props, shared, settings);
    let mut sink = lock_sink(sink);
    sink.update_presence(&presence);
    sink.run_callbacks();
}

/// Handlers that only report sink status to the log.
pub fn logging_handlers() -> SinkHandlers {
    SinkHandlers {
        ready: Box::new(|user| {
            tracing::info!(user = %user.display_name(), "Discord connected");
        }),
        disconnected: Box::new(|code, reason| {
            tracing::warn!(code, reason, "Discord disconnected");
        }),
        errored: Box::new(|code, reason| {
            tracing::error!(code, reason, "Discord error");
        }),
    }
}

fn lock_sink(sink: &SharedSink) -> MutexGuard<'_, Box<dyn PresenceSink>> {
    sink.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct PresenceDriver {
    task: IntervalTask,
    props: Arc<dyn PropertySource>,
    shared: Arc<SharedState>,
    sink: SharedSink,
    settings: Arc<PresenceSettings>,
    period: Duration,
    initialized: Arc<AtomicBool>,
    shut_down: bool,
}

impl PresenceDriver {
    pub fn new(
        props: Arc<dyn PropertySource>,
        shared: Arc<SharedState>,
        sink: Box<dyn PresenceSink>,
        settings: PresenceSettings,
        period: Duration,
    ) -> Self {
        Self {
            task: IntervalTask::new("presence-push"),
            props,
            shared,
            sink: Arc::new(Mutex::new(sink)),
            settings: Arc::new(settings),
            period,
            initialized: Arc::new(AtomicBool::new(false)),
            shut_down: false,
        }
    }

    /// (Re)starts pushing. The sink is initialized on the worker thread the first
    /// time only; later restarts skip it.
    pub fn start(&mut self) -> Result<(), TaskError> {
        let init = {
            let sink = Arc::clone(&self.sink);
            let settings = Arc::clone(&self.settings);
            let initialized = Arc::clone(&self.initialized);
            move || {
                if initialized.swap(true, Ordering::SeqCst) {
                    return;
                }
                tracing::info!(app_id = %settings.application_id, "initializing presence sink");
                lock_sink(&sink).init(&settings.application_id, logging_handlers());
            }
        };
        let body = {
            let props = Arc::clone(&self.props);
            let shared = Arc::clone(&self.shared);
            let settings = Arc::clone(&self.settings);
            let sink = Arc::clone(&self.sink);
            move || push_tick(&*props, &shared, &settings, &sink)
        };
        self.task.start_with_init(self.period, body, init)
    }

    pub fn stop(&mut self) {
        self.task.stop();
    }

    pub fn running(&self) -> bool {
        self.task.running()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Stops the worker, then releases the sink. Only the first call reaches the sink.
    pub fn shutdown(&mut self) {
        self.stop();
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        lock_sink(&self.sink).shutdown();
        tracing::info!("presence sink shut down");
    }
}
