//! Polls the player's pause and cache flags and classifies playback.

use crate::host::{PropertySource, read_flag};
use crate::interval::{IntervalTask, TaskError};
use crate::state::{PlayerState, SharedState};
use std::sync::Arc;
use std::time::Duration;

pub const PAUSE_PROPERTY: &str = "pause";
pub const PAUSED_FOR_CACHE_PROPERTY: &str = "paused-for-cache";

/// Next classification given the two flag reads. `None` is a failed read.
///
/// A failed pause read keeps the current value; buffering overrides both.
pub fn classify(current: PlayerState, paused: Option<bool>, buffering: Option<bool>) -> PlayerState {
    let mut next = match paused {
        Some(true) => PlayerState::Paused,
        Some(false) => PlayerState::Playing,
        None => current,
    };
    if buffering == Some(true) {
        next = PlayerState::Buffering;
    }
    next
}

/// One poll: two independent reads, one atomic publish.
pub fn poll_tick<P: PropertySource + ?Sized>(props: &P, shared: &SharedState) {
    let paused = read_flag(props, PAUSE_PROPERTY);
    let buffering = read_flag(props, PAUSED_FOR_CACHE_PROPERTY);
    let current = shared.player_state();
    let next = classify(current, paused, buffering);
    if next != current {
        tracing::debug!(from = ?current, to = ?next, "playback state changed");
    }
    shared.set_player_state(next);
}

/// Runs [`poll_tick`] on its own interval task.
pub struct PlaybackPoller {
    task: IntervalTask,
    props: Arc<dyn PropertySource>,
    shared: Arc<SharedState>,
    period: Duration,
}

impl PlaybackPoller {
    pub fn new(props: Arc<dyn PropertySource>, shared: Arc<SharedState>, period: Duration) -> Self {
        Self {
            task: IntervalTask::new("mpv-state-poll"),
            props,
            shared,
            period,
        }
    }

    /// (Re)starts polling; a running generation is joined first.
    pub fn start(&mut self) -> Result<(), TaskError> {
        let props = Arc::clone(&self.props);
        let shared = Arc::clone(&self.shared);
        self.task.start(self.period, move || poll_tick(&*props, &shared))
    }

    pub fn stop(&mut self) {
        self.task.stop();
    }

    pub fn running(&self) -> bool {
        self.task.running()
    }
}
