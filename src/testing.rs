//! In-memory fakes for the provider, the token store and the player API.

use anyhow::{anyhow, Result};
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::{PlaybackApi, PlayerAction};
use crate::auth::{AuthProvider, GrantedTokens, StoredTokens, TokenStore};
use crate::error::ApiError;
use crate::models::PlaybackState;

#[derive(Default)]
pub struct MemoryStore {
    record: Mutex<Option<StoredTokens>>,
}

impl TokenStore for MemoryStore {
    fn load(&self) -> Result<Option<StoredTokens>> {
        Ok(self.record.lock().unwrap().clone())
    }

    fn save(&self, tokens: &StoredTokens) -> Result<()> {
        *self.record.lock().unwrap() = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.record.lock().unwrap() = None;
        Ok(())
    }
}

/// Scripted OAuth provider. Refresh call N grants `access-N`.
#[derive(Default)]
pub struct FakeProvider {
    refresh_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    /// Fail this many refreshes before succeeding (`usize::MAX`: always).
    failing_refreshes: usize,
    fail_exchange: bool,
    rotate: bool,
    delay: Duration,
    seen: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn failing_refresh() -> Self {
        Self::default().fail_next_refreshes(usize::MAX)
    }

    pub fn failing_exchange() -> Self {
        Self {
            fail_exchange: true,
            ..Self::default()
        }
    }

    pub fn fail_next_refreshes(mut self, n: usize) -> Self {
        self.failing_refreshes = n;
        self
    }

    /// Return a new refresh token with every grant.
    pub fn rotating(mut self) -> Self {
        self.rotate = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl AuthProvider for FakeProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "https://accounts.example.com/authorize?response_type=code&state={}",
            state
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<GrantedTokens> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_exchange {
            return Err(anyhow!("invalid_grant: code {} already used", code));
        }
        Ok(GrantedTokens {
            access_token: format!("access-from-{}", code),
            refresh_token: Some("refresh-from-code".into()),
            expires_in: Some(Duration::from_secs(3600)),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<GrantedTokens> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().unwrap().push(refresh_token.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if n <= self.failing_refreshes {
            return Err(anyhow!("server_error on refresh {}", n));
        }
        Ok(GrantedTokens {
            access_token: format!("access-{}", n),
            refresh_token: self.rotate.then(|| format!("refresh-{}", n)),
            expires_in: Some(Duration::from_secs(3600)),
        })
    }
}

/// Player API fake that records tokens and accepted actions.
pub struct FakeApi {
    playback: Result<Option<PlaybackState>, ApiError>,
    queued: Mutex<VecDeque<Result<Option<PlaybackState>, ApiError>>>,
    action_error: Option<ApiError>,
    rejected: HashSet<String>,
    tokens: Mutex<Vec<String>>,
    actions: Mutex<Vec<PlayerAction>>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self::with_playback(Ok(None))
    }
}

impl FakeApi {
    /// Answer every playback query with `playback`.
    pub fn with_playback(playback: Result<Option<PlaybackState>, ApiError>) -> Self {
        Self {
            playback,
            queued: Mutex::new(VecDeque::new()),
            action_error: None,
            rejected: HashSet::new(),
            tokens: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
        }
    }

    /// Answer 401 whenever `token` is presented.
    pub fn rejecting(mut self, token: &str) -> Self {
        self.rejected.insert(token.to_string());
        self
    }

    pub fn failing_actions(mut self, err: ApiError) -> Self {
        self.action_error = Some(err);
        self
    }

    /// One-off answer for the next playback query.
    pub fn push_playback(&self, playback: Result<Option<PlaybackState>, ApiError>) {
        self.queued.lock().unwrap().push_back(playback);
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<PlayerAction> {
        self.actions.lock().unwrap().clone()
    }

    fn check_token(&self, token: &str) -> Result<(), ApiError> {
        self.tokens.lock().unwrap().push(token.to_string());
        if self.rejected.contains(token) {
            return Err(ApiError::Unauthorized);
        }
        Ok(())
    }
}

impl PlaybackApi for FakeApi {
    async fn current_playback(&self, token: &str) -> Result<Option<PlaybackState>, ApiError> {
        self.check_token(token)?;
        let queued = self.queued.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.playback.clone())
    }

    async fn send(&self, token: &str, action: PlayerAction) -> Result<(), ApiError> {
        self.check_token(token)?;
        if let Some(err) = &self.action_error {
            return Err(err.clone());
        }
        self.actions.lock().unwrap().push(action);
        Ok(())
    }
}

/// A playing track (duration 200s) on a device with `volume` percent.
pub fn playing_state(volume: Option<u8>) -> PlaybackState {
    let volume = volume.map_or("null".to_string(), |v| v.to_string());
    serde_json::from_str(&format!(
        r#"{{
            "is_playing": true,
            "progress_ms": 1000,
            "device": {{"id": "dev", "name": "Desk", "type": "Computer", "volume_percent": {}}},
            "item": {{
                "id": "track-1",
                "name": "Song",
                "duration_ms": 200000,
                "artists": [{{"name": "Band"}}],
                "album": {{"name": "Record", "images": []}}
            }}
        }}"#,
        volume
    ))
    .unwrap()
}

/// Loopback server that accepts connections and never answers.
pub async fn silent_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}
