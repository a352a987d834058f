// format.rs: Renders the two presence lines from playback state and metadata

use crate::host::{PropertySource, read_double, read_osd_string};
use crate::metadata::TrackMetadata;
use crate::state::{PlayerState, SharedState};

pub const TIME_POS_PROPERTY: &str = "time-pos";
pub const DURATION_PROPERTY: &str = "duration";
pub const SPEED_PROPERTY: &str = "speed";

const SPEED_SIGNIFICANT_DIGITS: i32 = 6;

/// The rendered status ("details") and subject ("state") lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceLines {
    pub status: String,
    pub subject: String,
}

/// Reads the live properties and renders both lines. Never fails; unreadable
/// fields render as empty strings.
pub fn render_lines<P: PropertySource + ?Sized>(props: &P, shared: &SharedState) -> PresenceLines {
    let state = shared.player_state();
    let time_pos = read_osd_string(props, TIME_POS_PROPERTY);
    let duration = read_osd_string(props, DURATION_PROPERTY);
    let speed = read_double(props, SPEED_PROPERTY).unwrap_or(1.0);
    let cache = shared.track();

    PresenceLines {
        status: status_line(state, &time_pos, &duration, speed),
        subject: subject_line(&cache.track(), cache.filename()),
    }
}

/// "{state} ({time-pos}/{duration})", with " {speed}x" before the closing
/// parenthesis when playback is not at normal speed.
pub fn status_line(state: PlayerState, time_pos: &str, duration: &str, speed: f64) -> String {
    let mut line = format!("{} ({}/{}", state.human(), time_pos, duration);
    if speed != 1.0 {
        line.push(' ');
        line.push_str(&format_speed(speed));
        line.push('x');
    }
    line.push(')');
    strip_nul(line)
}

/// Song identity, falling back to the title alone and then to the filename.
pub fn subject_line(track: &TrackMetadata, filename: &str) -> String {
    let line = if track.artist.is_empty() && track.title.is_empty() {
        filename.to_string()
    } else if track.artist.is_empty() {
        track.title.clone()
    } else {
        format!("{} - {}", track.artist, track.title)
    };
    strip_nul(line)
}

/// Up to six significant digits, trailing zeros removed: 1.5 -> "1.5", 2 -> "2".
pub fn format_speed(speed: f64) -> String {
    if !speed.is_finite() {
        return speed.to_string();
    }
    if speed == 0.0 {
        return "0".to_string();
    }
    let magnitude = speed.abs().log10().floor() as i32;
    let decimals = (SPEED_SIGNIFICANT_DIGITS - 1 - magnitude).max(0) as usize;
    let mut text = format!("{speed:.decimals$}");
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    text
}

// The player occasionally hands out strings with embedded NULs.
fn strip_nul(mut text: String) -> String {
    if text.contains('\0') {
        text.retain(|c| c != '\0');
    }
    text
}
