//! Mirrors mpv playback into Discord Rich Presence.

pub mod config;
pub mod discord;
pub mod driver;
pub mod event;
pub mod format;
pub mod host;
pub mod interval;
pub mod metadata;
pub mod mpv;
pub mod playback;
pub mod presence;
pub mod state;
pub mod transport;

pub use config::Config;
