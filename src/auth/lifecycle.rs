//! Access-token lifecycle
//!
//! `TokenManager` owns the live token pair for the whole process. Every API
//! call goes through [`TokenManager::with_valid_token`], which renews the
//! access token shortly before it expires and once more when the provider
//! rejects it.
//!
//! Renewal is single-flight: the state mutex is held across the refresh
//! grant, so concurrent callers wait for the in-flight renewal and then see
//! the fresh token instead of issuing refresh calls of their own.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::oauth::{AuthProvider, GrantedTokens};
use super::tokens::{StoredTokens, TokenPair, TokenStore};
use crate::error::{ApiError, Error};

/// Renew this long before the access token expires.
pub const RENEWAL_MARGIN: Duration = Duration::from_secs(60);
/// Consecutive renewal failures tolerated before giving up.
pub const MAX_RENEWAL_ATTEMPTS: u32 = 3;
/// Pause between failed renewal attempts.
pub const RENEWAL_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Assumed lifetime when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Bounded counter of consecutive renewal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    failures: u32,
    max: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { failures: 0, max }
    }

    /// Record a failure and return the new count.
    pub fn record_failure(&mut self) -> u32 {
        self.failures = (self.failures + 1).min(self.max);
        self.failures
    }

    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.max
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(MAX_RENEWAL_ATTEMPTS)
    }
}

struct State {
    pair: Option<TokenPair>,
    /// `None` means unknown (e.g. loaded from disk): renew before use.
    expires_at: Option<Instant>,
    budget: RetryBudget,
    /// Set once the budget is exhausted. Cleared only by `install`.
    halted: bool,
}

impl State {
    fn needs_renewal(&self, now: Instant, margin: Duration) -> bool {
        match (&self.pair, self.expires_at) {
            (Some(pair), Some(expires_at)) => {
                pair.access_token.is_empty() || now + margin >= expires_at
            }
            _ => true,
        }
    }

    fn refresh_token(&self) -> Option<String> {
        self.pair
            .as_ref()
            .filter(|p| p.can_renew())
            .map(|p| p.refresh_token.clone())
    }

    fn access_token(&self) -> Option<String> {
        self.pair
            .as_ref()
            .map(|p| p.access_token.clone())
            .filter(|t| !t.is_empty())
    }
}

pub struct TokenManager<P> {
    provider: P,
    store: Arc<dyn TokenStore>,
    state: Mutex<State>,
    margin: Duration,
    retry_delay: Duration,
}

impl<P: AuthProvider> TokenManager<P> {
    pub fn new(provider: P, store: Arc<dyn TokenStore>) -> Self {
        Self {
            provider,
            store,
            state: Mutex::new(State {
                pair: None,
                expires_at: None,
                budget: RetryBudget::default(),
                halted: false,
            }),
            margin: RENEWAL_MARGIN,
            retry_delay: RENEWAL_RETRY_DELAY,
        }
    }

    /// Load the startup pair: the token store first, then `bootstrap`
    /// (a refresh token from the config file), which is written through to
    /// the store. Returns false when neither has a usable refresh token.
    pub async fn seed(&self, bootstrap: Option<TokenPair>) -> bool {
        let stored = match self.store.load() {
            Ok(stored) => stored.map(TokenPair::from).filter(TokenPair::can_renew),
            Err(e) => {
                tracing::warn!("Could not read token store: {:#}", e);
                None
            }
        };

        let pair = match stored {
            Some(pair) => {
                tracing::info!("Loaded tokens saved at {}", pair.obtained_at);
                pair
            }
            None => match bootstrap.filter(TokenPair::can_renew) {
                Some(pair) => {
                    tracing::info!("Seeding token store from configured refresh token");
                    self.persist(&pair);
                    pair
                }
                None => return false,
            },
        };

        let mut state = self.state.lock().await;
        state.pair = Some(pair);
        state.expires_at = None;
        true
    }

    /// Make `pair` the authoritative pair (after a completed authorization).
    /// Resets the retry budget and lifts a previous fatal halt.
    pub async fn install(&self, pair: TokenPair, expires_in: Option<Duration>) {
        let mut state = self.state.lock().await;
        state.expires_at = Some(Instant::now() + expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME));
        state.pair = Some(pair);
        state.budget.reset();
        state.halted = false;
        tracing::info!("New token pair installed");
    }

    /// Run `call` with a valid access token.
    ///
    /// Renews first when the token is within the renewal margin. If `call`
    /// reports `ApiError::Unauthorized`, renews once and retries once; a
    /// second rejection is `Error::AuthFatal`.
    pub async fn with_valid_token<T, F, Fut>(&self, call: F) -> Result<T, Error>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let token = self.access_token().await?;
        match call(token.clone()).await {
            Err(ApiError::Unauthorized) => {
                tracing::info!("Access token rejected, renewing...");
                let token = self.renew_rejected(&token).await?;
                match call(token).await {
                    Err(ApiError::Unauthorized) => Err(Error::AuthFatal(
                        "access token rejected again after renewal".into(),
                    )),
                    other => other.map_err(Error::from),
                }
            }
            other => other.map_err(Error::from),
        }
    }

    /// Current access token, renewing first if it is (nearly) expired.
    pub async fn access_token(&self) -> Result<String, Error> {
        let mut state = self.state.lock().await;
        if state.needs_renewal(Instant::now(), self.margin) {
            self.renew(&mut state).await?;
        }
        state.access_token().ok_or(Error::MissingRefreshToken)
    }

    /// Renew after `rejected` was refused, unless another caller already
    /// replaced it while we waited for the lock.
    async fn renew_rejected(&self, rejected: &str) -> Result<String, Error> {
        let mut state = self.state.lock().await;
        if state.access_token().as_deref() == Some(rejected) || state.access_token().is_none() {
            self.renew(&mut state).await?;
        } else {
            tracing::debug!("Token already renewed by a concurrent caller");
        }
        state.access_token().ok_or(Error::MissingRefreshToken)
    }

    async fn renew(&self, state: &mut State) -> Result<(), Error> {
        if state.halted {
            return Err(Error::AuthFatal(
                "token renewal halted after repeated failures".into(),
            ));
        }

        loop {
            let refresh_token = match state.refresh_token() {
                Some(rt) => rt,
                None => match self.recover_refresh_token(state) {
                    Some(rt) => rt,
                    None => {
                        tracing::error!("No refresh token in memory or token store");
                        return Err(Error::MissingRefreshToken);
                    }
                },
            };

            tracing::info!("Refreshing access token...");
            match self.provider.refresh(&refresh_token).await {
                Ok(granted) => {
                    self.apply(state, granted, refresh_token);
                    tracing::info!("Access token refreshed");
                    return Ok(());
                }
                Err(e) => {
                    let failures = state.budget.record_failure();
                    if state.budget.is_exhausted() {
                        state.halted = true;
                        tracing::error!(
                            "Token renewal failed {} times, re-authorization required: {:#}",
                            failures,
                            e
                        );
                        return Err(Error::AuthFatal(format!(
                            "token renewal failed {} times: {:#}",
                            failures, e
                        )));
                    }

                    tracing::warn!(
                        "Token renewal failed (attempt {}/{}): {:#}. Retrying in {:?}...",
                        failures,
                        MAX_RENEWAL_ATTEMPTS,
                        e,
                        self.retry_delay
                    );
                    self.reload_refresh_token(state);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    fn apply(&self, state: &mut State, granted: GrantedTokens, old_refresh_token: String) {
        // Providers may or may not rotate the refresh token.
        let refresh_token = granted
            .refresh_token
            .filter(|rt| !rt.is_empty())
            .unwrap_or(old_refresh_token);

        let pair = TokenPair {
            access_token: granted.access_token,
            refresh_token,
            obtained_at: Utc::now(),
        };
        state.expires_at =
            Some(Instant::now() + granted.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME));
        state.budget.reset();
        self.persist(&pair);
        state.pair = Some(pair);
    }

    /// Write-through; the in-memory pair stays authoritative if this fails.
    fn persist(&self, pair: &TokenPair) {
        if let Err(e) = self.store.save(&StoredTokens::from(pair)) {
            tracing::error!("Failed to persist tokens: {:#}", e);
        }
    }

    fn stored_refresh_token(&self) -> Option<StoredTokens> {
        match self.store.load() {
            Ok(stored) => stored.filter(|s| !s.refresh_token.is_empty()),
            Err(e) => {
                tracing::warn!("Could not read token store: {:#}", e);
                None
            }
        }
    }

    fn recover_refresh_token(&self, state: &mut State) -> Option<String> {
        let stored = self.stored_refresh_token()?;
        tracing::info!("Recovered refresh token from token store");
        let refresh_token = stored.refresh_token.clone();
        match state.pair.as_mut() {
            Some(pair) => pair.refresh_token = refresh_token.clone(),
            None => state.pair = Some(TokenPair::from(stored)),
        }
        Some(refresh_token)
    }

    /// Re-read the stored refresh token before the next attempt. A no-op
    /// when it matches the one in memory.
    fn reload_refresh_token(&self, state: &mut State) {
        let Some(stored) = self.stored_refresh_token() else {
            return;
        };
        match state.pair.as_mut() {
            Some(pair) if pair.refresh_token != stored.refresh_token => {
                tracing::info!("Refresh token reloaded from token store");
                pair.refresh_token = stored.refresh_token;
            }
            Some(_) => tracing::debug!("Stored refresh token unchanged"),
            None => state.pair = Some(TokenPair::from(stored)),
        }
    }

    /// Consecutive renewal failures so far.
    pub async fn renewal_failures(&self) -> u32 {
        self.state.lock().await.budget.failures()
    }

    /// True once renewal has given up.
    pub async fn is_halted(&self) -> bool {
        self.state.lock().await.halted
    }

    /// Wait for an in-flight renewal to finish (used on shutdown).
    pub async fn wait_idle(&self) {
        let _state = self.state.lock().await;
    }
}
