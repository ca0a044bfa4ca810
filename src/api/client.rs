//! HTTP client for the Spotify Web API player endpoints
//!
//! Every response is classified into `ApiError` here, so nothing above this
//! layer looks at status codes.

use reqwest::StatusCode;
use std::time::Duration;

use super::{PlaybackApi, PlayerAction};
use crate::error::ApiError;
use crate::models::PlaybackState;

const API_BASE: &str = "https://api.spotify.com/v1";

/// Player API client. Cheap to clone.
#[derive(Clone)]
pub struct SpotifyClient {
    http: reqwest::Client,
    base: String,
}

impl SpotifyClient {
    /// Build a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: API_BASE.to_string(),
        })
    }

    /// Point the client at another API root.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

impl PlaybackApi for SpotifyClient {
    async fn current_playback(&self, token: &str) -> Result<Option<PlaybackState>, ApiError> {
        let url = self.url("/me/player");
        tracing::debug!("GET {}", url);

        let resp = self.http.get(&url).bearer_auth(token).send().await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let resp = check_response(resp).await?;
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send(&self, token: &str, action: PlayerAction) -> Result<(), ApiError> {
        let request = match action {
            PlayerAction::Play => self.http.put(self.url("/me/player/play")),
            PlayerAction::Pause => self.http.put(self.url("/me/player/pause")),
            PlayerAction::Next => self.http.post(self.url("/me/player/next")),
            PlayerAction::Previous => self.http.post(self.url("/me/player/previous")),
            PlayerAction::SetVolume(percent) => self
                .http
                .put(self.url("/me/player/volume"))
                .query(&[("volume_percent", percent.min(100))]),
        };
        tracing::debug!("Player command {:?}", action);

        let resp = request
            .bearer_auth(token)
            .header("Content-Length", "0")
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }
}

/// Turn a non-success response into a classified error.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let body = resp.text().await.unwrap_or_default();
    Err(classify(status, retry_after, body))
}

fn classify(status: StatusCode, retry_after: Option<u64>, body: String) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::NO_CONTENT => ApiError::NoContent,
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited(retry_after),
        _ => ApiError::Status {
            status: status.as_u16(),
            body,
        },
    }
}
