//! Playback polling and control on top of the token manager.
//!
//! Both halves report to the display layer through a `PlaybackEvent`
//! channel; neither ever returns a transient error to its trigger.

pub mod commands;
pub mod poller;

pub use commands::{Command, CommandDispatcher};
pub use poller::{Poller, PollerControl, PollerState};

use tokio::sync::mpsc;

use crate::error::Error;
use crate::models::PlaybackSnapshot;

/// Events consumed by the display layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    SnapshotUpdated(PlaybackSnapshot),
    Stopped,
    /// Non-fatal; the next tick proceeds normally.
    ApiError(String),
    /// Re-authorization required.
    AuthError(String),
}

pub type EventSender = mpsc::UnboundedSender<PlaybackEvent>;

/// Map an error onto the event the display layer should see.
pub(crate) fn error_event(err: &Error) -> PlaybackEvent {
    if err.is_auth_fatal() {
        PlaybackEvent::AuthError(err.to_string())
    } else {
        PlaybackEvent::ApiError(err.to_string())
    }
}
