//! Console rendering of playback events

use crate::models::PlaybackSnapshot;
use crate::playback::PlaybackEvent;

/// Prints a line whenever the visible state changes.
#[derive(Default)]
pub struct ConsoleDisplay {
    current: Option<PlaybackSnapshot>,
    stopped: bool,
    auth_error: bool,
}

impl ConsoleDisplay {
    /// Line to print for `event`, if any. Progress-only updates are quiet.
    pub fn render(&mut self, event: &PlaybackEvent) -> Option<String> {
        match event {
            PlaybackEvent::SnapshotUpdated(snapshot) => {
                self.stopped = false;
                self.auth_error = false;
                let previous = self.current.replace(snapshot.clone());
                let changed = previous.as_ref().map_or(true, |p| {
                    p.track_id != snapshot.track_id || p.is_playing != snapshot.is_playing
                });
                if !changed {
                    tracing::debug!(
                        "{} / {}",
                        format_duration(snapshot.progress_ms),
                        format_duration(snapshot.duration_ms)
                    );
                    return None;
                }
                Some(now_playing_line(snapshot))
            }
            PlaybackEvent::Stopped => {
                self.current = None;
                self.auth_error = false;
                if std::mem::replace(&mut self.stopped, true) {
                    return None;
                }
                Some("Nothing playing".to_string())
            }
            PlaybackEvent::ApiError(message) => {
                tracing::warn!("Spotify API error: {}", message);
                None
            }
            PlaybackEvent::AuthError(message) => {
                if std::mem::replace(&mut self.auth_error, true) {
                    return None;
                }
                Some(format!("Authentication failed: {}", message))
            }
        }
    }
}

fn now_playing_line(snapshot: &PlaybackSnapshot) -> String {
    let marker = if snapshot.is_playing { ">" } else { "||" };
    let mut line = format!("{} {}", marker, snapshot.title);
    if !snapshot.artist_names.is_empty() {
        line.push_str(&format!(" - {}", snapshot.artists()));
    }
    if !snapshot.album_name.is_empty() {
        line.push_str(&format!(" [{}]", snapshot.album_name));
    }
    line.push_str(&format!(
        " {}/{}",
        format_duration(snapshot.progress_ms),
        format_duration(snapshot.duration_ms)
    ));
    if let Some(device) = &snapshot.device {
        line.push_str(&format!(" on {} ({})", device.name, device.kind));
    }
    line
}

/// `m:ss`
pub fn format_duration(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
