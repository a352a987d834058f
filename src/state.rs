// state.rs: Playback classification and the state shared between the workers

use crate::metadata::MetadataCache;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Coarse playback classification shown in the presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PlayerState {
    #[default]
    Idle = 0,
    Paused = 1,
    Playing = 2,
    Buffering = 3,
}

impl PlayerState {
    pub fn human(self) -> &'static str {
        match self {
            PlayerState::Idle => "Idle",
            PlayerState::Paused => "Paused",
            PlayerState::Playing => "Playing",
            PlayerState::Buffering => "Buffering Remote Content",
        }
    }

    /// Asset key of the small state icon.
    pub fn icon_key(self) -> &'static str {
        match self {
            PlayerState::Idle => "mpv-idle",
            PlayerState::Paused => "mpv-paused",
            PlayerState::Playing => "mpv-playing",
            PlayerState::Buffering => "mpv-buffering",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PlayerState::Paused,
            2 => PlayerState::Playing,
            3 => PlayerState::Buffering,
            _ => PlayerState::Idle,
        }
    }
}

/// Bundles the current classification and the loaded file's metadata.
///
/// The classification is an atomic cell written by the poll worker and the
/// dispatcher; the metadata snapshot is swapped as a whole so readers never see a
/// half-built cache.
#[derive(Debug, Default)]
pub struct SharedState {
    player_state: AtomicU8,
    track: RwLock<Arc<MetadataCache>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn player_state(&self) -> PlayerState {
        PlayerState::from_u8(self.player_state.load(Ordering::Acquire))
    }

    pub fn set_player_state(&self, state: PlayerState) {
        self.player_state.store(state as u8, Ordering::Release);
    }

    pub fn track(&self) -> Arc<MetadataCache> {
        Arc::clone(&self.track.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace_track(&self, cache: MetadataCache) {
        *self.track.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(cache);
    }

    pub fn clear_track(&self) {
        self.replace_track(MetadataCache::default());
    }
}
