//! Fixed-interval playback poller

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};

use super::{error_event, EventSender, PlaybackEvent};
use crate::api::PlaybackApi;
use crate::auth::{AuthProvider, TokenManager};
use crate::error::{ApiError, Error};
use crate::models::PlaybackSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Playing,
    /// Suspended until `PollerControl::resume`.
    Unauthenticated,
}

/// External triggers for a running poller.
#[derive(Default)]
pub struct PollerControl {
    refresh: Notify,
    resume: Notify,
    suspended: AtomicBool,
}

impl PollerControl {
    /// Poll now instead of waiting for the next tick.
    pub fn refresh_now(&self) {
        self.refresh.notify_one();
    }

    /// Leave the unauthenticated state after a new authorization. A no-op
    /// (returning false) unless the poller is suspended, so no stale wakeup
    /// is left behind for a later suspension.
    pub fn resume(&self) -> bool {
        if self.suspended.swap(false, Ordering::SeqCst) {
            self.resume.notify_one();
            true
        } else {
            false
        }
    }

    fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }
}

pub struct Poller<A, P> {
    manager: Arc<TokenManager<P>>,
    api: A,
    interval: Duration,
    events: EventSender,
    control: Arc<PollerControl>,
    state: PollerState,
}

impl<A: PlaybackApi, P: AuthProvider> Poller<A, P> {
    pub fn new(
        manager: Arc<TokenManager<P>>,
        api: A,
        interval: Duration,
        events: EventSender,
    ) -> Self {
        Self {
            manager,
            api,
            interval,
            events,
            control: Arc::new(PollerControl::default()),
            state: PollerState::Idle,
        }
    }

    pub fn control(&self) -> Arc<PollerControl> {
        Arc::clone(&self.control)
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Query playback once and emit the resulting event.
    pub async fn tick(&mut self) -> PollerState {
        let api = &self.api;
        let result = self
            .manager
            .with_valid_token(|token| async move { api.current_playback(&token).await })
            .await;

        let event = match result {
            Ok(state) => match state.as_ref().and_then(PlaybackSnapshot::from_state) {
                Some(snapshot) => {
                    self.state = PollerState::Playing;
                    PlaybackEvent::SnapshotUpdated(snapshot)
                }
                None => {
                    self.state = PollerState::Idle;
                    PlaybackEvent::Stopped
                }
            },
            Err(Error::Api(ApiError::NoContent)) => {
                self.state = PollerState::Idle;
                PlaybackEvent::Stopped
            }
            Err(e) if e.is_auth_fatal() => {
                tracing::error!("Polling suspended: {}", e);
                self.state = PollerState::Unauthenticated;
                self.control.suspend();
                error_event(&e)
            }
            Err(e) => {
                tracing::warn!("Playback poll failed: {}", e);
                error_event(&e)
            }
        };

        if self.events.send(event).is_err() {
            tracing::debug!("Event receiver dropped");
        }
        self.state
    }

    /// Poll until the event receiver goes away.
    pub async fn run(mut self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Polling playback every {:?}", self.interval);

        loop {
            if self.state == PollerState::Unauthenticated {
                self.control.resume.notified().await;
                tracing::info!("Polling resumed");
                self.state = PollerState::Idle;
                ticker.reset();
            } else {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.control.refresh.notified() => {}
                }
            }

            if self.events.is_closed() {
                break;
            }
            self.tick().await;
        }
        tracing::debug!("Poller stopped");
    }
}
