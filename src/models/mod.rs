//! Data models for Spotify playback

mod playback;

pub use playback::*;
