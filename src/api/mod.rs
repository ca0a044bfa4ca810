//! Spotify Web API access for playback state and control

pub mod client;

use std::future::Future;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::PlaybackState;

pub use client::SpotifyClient;

/// Player mutation sent to the Web API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerAction {
    Play,
    Pause,
    Next,
    Previous,
    SetVolume(u8),
}

/// Remote playback API, called with a bearer access token.
pub trait PlaybackApi: Send + Sync {
    /// `Ok(None)` when nothing is playing (204 or empty body).
    fn current_playback(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<PlaybackState>, ApiError>> + Send;

    fn send(
        &self,
        token: &str,
        action: PlayerAction,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

impl<T: PlaybackApi> PlaybackApi for Arc<T> {
    fn current_playback(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<PlaybackState>, ApiError>> + Send {
        (**self).current_playback(token)
    }

    fn send(
        &self,
        token: &str,
        action: PlayerAction,
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        (**self).send(token, action)
    }
}
