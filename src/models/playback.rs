//! Playback state as returned by `GET /v1/me/player`, and the snapshot
//! handed to the display layer.

use serde::{Deserialize, Serialize};

/// Raw playback state
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackState {
    #[serde(default)]
    pub is_playing: bool,
    pub progress_ms: Option<u64>,
    pub item: Option<Item>,
    pub device: Option<Device>,
}

/// Currently playing track or episode
#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub artists: Vec<Artist>,
    pub album: Option<Album>,
    /// Episodes carry a show instead of an album
    pub show: Option<Album>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Album {
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub volume_percent: Option<u8>,
}

/// What is playing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub track_id: Option<String>,
    pub title: String,
    pub artist_names: Vec<String>,
    pub album_name: String,
    pub album_art_candidates: Vec<Image>,
    pub progress_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
    pub device: Option<Device>,
}

impl PlaybackSnapshot {
    /// `None` when there is no active item.
    pub fn from_state(state: &PlaybackState) -> Option<Self> {
        let item = state.item.as_ref()?;
        let album = item.album.as_ref().or(item.show.as_ref());

        Some(Self {
            track_id: item.id.clone(),
            title: item.name.clone(),
            artist_names: item.artists.iter().map(|a| a.name.clone()).collect(),
            album_name: album.map(|a| a.name.clone()).unwrap_or_default(),
            album_art_candidates: album.map(|a| a.images.clone()).unwrap_or_default(),
            progress_ms: state.progress_ms.unwrap_or(0),
            duration_ms: item.duration_ms,
            is_playing: state.is_playing,
            device: state.device.clone(),
        })
    }

    /// Album art whose width is closest to `target` pixels.
    pub fn album_art(&self, target: u32) -> Option<&Image> {
        self.album_art_candidates
            .iter()
            .min_by_key(|img| img.width.unwrap_or(0).abs_diff(target))
    }

    pub fn artists(&self) -> String {
        self.artist_names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYING: &str = r#"{
        "device": {"id": "dev1", "is_active": true, "name": "Kitchen", "type": "Speaker", "volume_percent": 40},
        "progress_ms": 61000,
        "is_playing": true,
        "currently_playing_type": "track",
        "item": {
            "id": "4uLU6hMCjMI75M1A2tKUQC",
            "name": "Never Gonna Give You Up",
            "duration_ms": 213573,
            "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
            "artists": [{"name": "Rick Astley"}],
            "album": {
                "name": "Whenever You Need Somebody",
                "images": [
                    {"url": "https://i.scdn.co/640", "width": 640, "height": 640},
                    {"url": "https://i.scdn.co/300", "width": 300, "height": 300},
                    {"url": "https://i.scdn.co/64", "width": 64, "height": 64}
                ]
            }
        }
    }"#;

    #[test]
    fn test_snapshot_from_playing_state() {
        let state: PlaybackState = serde_json::from_str(PLAYING).unwrap();
        let snapshot = PlaybackSnapshot::from_state(&state).unwrap();

        assert_eq!(snapshot.title, "Never Gonna Give You Up");
        assert_eq!(snapshot.duration_ms, 213573);
        assert_eq!(snapshot.progress_ms, 61000);
        assert!(snapshot.is_playing);
        assert_eq!(snapshot.artists(), "Rick Astley");
        assert_eq!(snapshot.album_name, "Whenever You Need Somebody");
        assert_eq!(snapshot.device.unwrap().volume_percent, Some(40));
    }

    #[test]
    fn test_null_item_has_no_snapshot() {
        let state: PlaybackState =
            serde_json::from_str(r#"{"is_playing": false, "item": null, "device": null}"#).unwrap();
        assert!(PlaybackSnapshot::from_state(&state).is_none());
    }

    #[test]
    fn test_episode_uses_show_name() {
        let state: PlaybackState = serde_json::from_str(
            r#"{"is_playing": true, "progress_ms": 5,
                "item": {"id": "ep", "name": "Episode 1", "duration_ms": 1000,
                         "show": {"name": "A Podcast", "images": []}}}"#,
        )
        .unwrap();
        let snapshot = PlaybackSnapshot::from_state(&state).unwrap();
        assert_eq!(snapshot.album_name, "A Podcast");
        assert!(snapshot.artist_names.is_empty());
    }

    #[test]
    fn test_album_art_picks_closest_width() {
        let state: PlaybackState = serde_json::from_str(PLAYING).unwrap();
        let snapshot = PlaybackSnapshot::from_state(&state).unwrap();
        assert_eq!(snapshot.album_art(200).unwrap().url, "https://i.scdn.co/300");
        assert_eq!(snapshot.album_art(1000).unwrap().url, "https://i.scdn.co/640");
    }
}
