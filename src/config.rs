use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_APP_ID: &str = "673967887387590658";
pub const LARGE_IMAGE_KEY: &str = "mpv-logo";
pub const LARGE_IMAGE_TEXT: &str = "mpv";

#[cfg(windows)]
const DEFAULT_SOCKET: &str = r"\\.\pipe\mpvsocket";
#[cfg(not(windows))]
const DEFAULT_SOCKET: &str = "/tmp/mpvsocket";

/// Application configuration from CLI
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// mpv JSON IPC socket (start mpv with --input-ipc-server=<PATH>).
    /// Falls back to MPV_SOCKET, then the platform default.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,
    /// Discord application id. Falls back to MPV_PRESENCE_APP_ID.
    #[arg(long = "app-id", value_name = "ID")]
    pub app_id: Option<String>,
    /// Playback state poll interval in milliseconds
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_ms: u64,
    /// Presence push interval in milliseconds
    #[arg(long, default_value_t = 1500, value_parser = clap::value_parser!(u64).range(1..))]
    pub push_interval_ms: u64,
    /// Do not show the small per-state icon
    #[arg(long = "no-state-icon")]
    pub no_state_icon: bool,
    /// Enable debug logging to stderr
    #[arg(long)]
    pub debug_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: None,
            app_id: None,
            poll_interval_ms: 500,
            push_interval_ms: 1500,
            no_state_icon: false,
            debug_log: false,
        }
    }
}

impl Config {
    /// Fills unset options from the environment.
    pub fn apply_env(&mut self) {
        if self.socket.is_none()
            && let Some(s) = non_empty_env("MPV_SOCKET")
        {
            self.socket = Some(PathBuf::from(s));
        }
        if self.app_id.is_none()
            && let Some(id) = non_empty_env("MPV_PRESENCE_APP_ID")
        {
            self.app_id = Some(id);
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET))
    }

    pub fn app_id(&self) -> &str {
        self.app_id.as_deref().unwrap_or(DEFAULT_APP_ID)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
