// event.rs: Lifecycle event dispatch and the blocking event loop

use crate::Config;
use crate::driver::{PresenceDriver, PresenceSettings};
use crate::host::{EventSource, HostError, HostEvent, PropertySource};
use crate::interval::TaskError;
use crate::metadata::MetadataCache;
use crate::playback::PlaybackPoller;
use crate::presence::PresenceSink;
use crate::state::{PlayerState, SharedState};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Whether the event loop should keep waiting for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Owns both workers and drives them from the player's lifecycle events.
pub struct Dispatcher {
    props: Arc<dyn PropertySource>,
    shared: Arc<SharedState>,
    poller: PlaybackPoller,
    driver: PresenceDriver,
}

impl Dispatcher {
    pub fn new(props: Arc<dyn PropertySource>, sink: Box<dyn PresenceSink>, config: &Config) -> Self {
        let shared = Arc::new(SharedState::new());
        let poller = PlaybackPoller::new(Arc::clone(&props), Arc::clone(&shared), config.poll_interval());
        let driver = PresenceDriver::new(
            Arc::clone(&props),
            Arc::clone(&shared),
            sink,
            PresenceSettings::from_config(config),
            config.push_interval(),
        );
        Self {
            props,
            shared,
            poller,
            driver,
        }
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn poller_running(&self) -> bool {
        self.poller.running()
    }

    pub fn driver_running(&self) -> bool {
        self.driver.running()
    }

    pub fn process_event(&mut self, event: Option<HostEvent>) -> Result<Flow, DispatchError> {
        let Some(event) = event else {
            return Ok(Flow::Continue);
        };
        match event {
            HostEvent::FileLoaded => self.on_file_loaded()?,
            HostEvent::Idle => self.on_idle(),
            HostEvent::Shutdown => {
                self.shutdown();
                return Ok(Flow::Exit);
            }
            HostEvent::Other(name) => {
                tracing::trace!(event = %name, "ignoring event");
            }
        }
        Ok(Flow::Continue)
    }

    fn on_file_loaded(&mut self) -> Result<(), DispatchError> {
        // Both workers are joined before the new cache goes in, so no tick from the
        // previous file can observe it.
        self.driver.stop();
        self.poller.stop();

        let cache = MetadataCache::load(&*self.props)?;
        let track = cache.track();
        tracing::info!(
            artist = %track.artist,
            title = %track.title,
            album = %track.album,
            filename = %cache.filename(),
            "file loaded"
        );
        self.shared.replace_track(cache);
        self.shared.set_player_state(PlayerState::Playing);

        self.driver.start()?;
        self.poller.start()?;
        Ok(())
    }

    fn on_idle(&mut self) {
        self.poller.stop();
        self.shared.set_player_state(PlayerState::Idle);
        tracing::debug!("player idle");
    }

    /// Stops both workers and releases the sink. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.driver.stop();
        self.poller.stop();
        self.driver.shutdown();
        self.shared.clear_track();
    }
}

/// Blocks on the event source and dispatches until shutdown.
///
/// A lost host connection is fatal: everything is torn down and the error returned.
pub fn listen<E: EventSource + ?Sized>(events: &mut E, dispatcher: &mut Dispatcher) -> Result<(), DispatchError> {
    loop {
        let outcome = events
            .wait_event()
            .map_err(DispatchError::from)
            .and_then(|event| dispatcher.process_event(event));
        match outcome {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => return Ok(()),
            Err(DispatchError::Host(e)) if !e.is_fatal() => {
                tracing::warn!(error = %e, "host error while handling event");
            }
            Err(e) => {
                tracing::error!(error = %e, "event loop failed, shutting down");
                dispatcher.shutdown();
                return Err(e);
            }
        }
    }
}
