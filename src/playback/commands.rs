//! Playback control commands

use std::str::FromStr;
use std::sync::Arc;

use super::{error_event, EventSender};
use crate::api::{PlaybackApi, PlayerAction};
use crate::auth::{AuthProvider, TokenManager};
use crate::error::Error;

/// User-level control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "play" => Ok(Command::Play),
            "pause" => Ok(Command::Pause),
            "next" | "skip" => Ok(Command::Next),
            "prev" | "previous" | "back" => Ok(Command::Previous),
            "+" | "up" | "vol+" => Ok(Command::VolumeUp),
            "-" | "down" | "vol-" => Ok(Command::VolumeDown),
            other => Err(format!(
                "Unknown command: {}. Use: play, pause, next, prev, +, -",
                other
            )),
        }
    }
}

/// Stateless pass-through from commands to the player API, gated on the
/// shared token manager.
pub struct CommandDispatcher<A, P> {
    manager: Arc<TokenManager<P>>,
    api: A,
    volume_step: u8,
    events: Option<EventSender>,
}

impl<A: PlaybackApi, P: AuthProvider> CommandDispatcher<A, P> {
    pub fn new(manager: Arc<TokenManager<P>>, api: A, volume_step: u8) -> Self {
        Self {
            manager,
            api,
            volume_step,
            events: None,
        }
    }

    /// Report failures of `dispatch` as events.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Run a command, reporting failure as an event instead of returning it.
    /// Returns true on success.
    pub async fn dispatch(&self, command: Command) -> bool {
        match self.execute(command).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{:?} failed: {}", command, e);
                if let Some(events) = &self.events {
                    let _ = events.send(error_event(&e));
                }
                false
            }
        }
    }

    pub async fn execute(&self, command: Command) -> Result<(), Error> {
        match command {
            Command::Play => self.send(PlayerAction::Play).await,
            Command::Pause => self.send(PlayerAction::Pause).await,
            Command::Next => self.send(PlayerAction::Next).await,
            Command::Previous => self.send(PlayerAction::Previous).await,
            Command::VolumeUp => self.adjust_volume(i16::from(self.volume_step)).await,
            Command::VolumeDown => self.adjust_volume(-i16::from(self.volume_step)).await,
        }
    }

    async fn send(&self, action: PlayerAction) -> Result<(), Error> {
        let api = &self.api;
        self.manager
            .with_valid_token(|token| async move { api.send(&token, action).await })
            .await
    }

    /// Read the device volume, then set it `delta` percent away.
    /// Silently does nothing without a reporting device.
    async fn adjust_volume(&self, delta: i16) -> Result<(), Error> {
        let api = &self.api;
        let state = self
            .manager
            .with_valid_token(|token| async move { api.current_playback(&token).await })
            .await?;

        let Some(current) = state
            .and_then(|s| s.device)
            .and_then(|d| d.volume_percent)
        else {
            tracing::debug!("No active device, volume unchanged");
            return Ok(());
        };

        let target = (i16::from(current) + delta).clamp(0, 100) as u8;
        if target == current {
            return Ok(());
        }
        tracing::info!("Volume {} -> {}", current, target);
        self.send(PlayerAction::SetVolume(target)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenPair;
    use crate::error::ApiError;
    use crate::playback::PlaybackEvent;
    use crate::testing::{playing_state, FakeApi, FakeProvider, MemoryStore};
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn setup(
        provider: FakeProvider,
        api: FakeApi,
        expires_in: Duration,
    ) -> (CommandDispatcher<Arc<FakeApi>, FakeProvider>, Arc<FakeApi>) {
        let manager = Arc::new(TokenManager::new(provider, Arc::new(MemoryStore::default())));
        manager
            .install(TokenPair::new("live".into(), "rt".into()), Some(expires_in))
            .await;
        let api = Arc::new(api);
        (CommandDispatcher::new(manager, Arc::clone(&api), 5), api)
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_simple_commands_map_to_actions() {
        let (dispatcher, api) = setup(FakeProvider::default(), FakeApi::default(), HOUR).await;

        for command in [Command::Play, Command::Pause, Command::Next, Command::Previous] {
            dispatcher.execute(command).await.unwrap();
        }

        assert_eq!(
            api.actions(),
            vec![
                PlayerAction::Play,
                PlayerAction::Pause,
                PlayerAction::Next,
                PlayerAction::Previous
            ]
        );
    }

    #[tokio::test]
    async fn test_volume_up_without_device_is_noop() {
        let (dispatcher, api) =
            setup(FakeProvider::default(), FakeApi::with_playback(Ok(None)), HOUR).await;

        dispatcher.execute(Command::VolumeUp).await.unwrap();

        assert!(api.actions().is_empty());
    }

    #[tokio::test]
    async fn test_volume_up_without_reported_volume_is_noop() {
        let api = FakeApi::with_playback(Ok(Some(playing_state(None))));
        let (dispatcher, api) = setup(FakeProvider::default(), api, HOUR).await;

        dispatcher.execute(Command::VolumeUp).await.unwrap();

        assert!(api.actions().is_empty());
    }

    #[tokio::test]
    async fn test_volume_adjusts_by_step_and_clamps() {
        let api = FakeApi::with_playback(Ok(Some(playing_state(Some(40)))));
        let (dispatcher, api) = setup(FakeProvider::default(), api, HOUR).await;
        dispatcher.execute(Command::VolumeDown).await.unwrap();
        assert_eq!(api.actions(), vec![PlayerAction::SetVolume(35)]);

        let api = FakeApi::with_playback(Ok(Some(playing_state(Some(98)))));
        let (dispatcher, api) = setup(FakeProvider::default(), api, HOUR).await;
        dispatcher.execute(Command::VolumeUp).await.unwrap();
        assert_eq!(api.actions(), vec![PlayerAction::SetVolume(100)]);

        let api = FakeApi::with_playback(Ok(Some(playing_state(Some(0)))));
        let (dispatcher, api) = setup(FakeProvider::default(), api, HOUR).await;
        dispatcher.execute(Command::VolumeDown).await.unwrap();
        assert!(api.actions().is_empty());
    }

    #[tokio::test]
    async fn test_command_failure_reported_as_api_error() {
        let api = FakeApi::default().failing_actions(ApiError::Status {
            status: 404,
            body: "no active device".into(),
        });
        let (dispatcher, _api) = setup(FakeProvider::default(), api, HOUR).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = dispatcher.with_events(tx);

        assert!(!dispatcher.dispatch(Command::Play).await);
        assert!(matches!(rx.try_recv().unwrap(), PlaybackEvent::ApiError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_renewal_reported_as_auth_error() {
        let (dispatcher, api) =
            setup(FakeProvider::failing_refresh(), FakeApi::default(), Duration::ZERO).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = dispatcher.with_events(tx);

        assert!(!dispatcher.dispatch(Command::Next).await);
        assert!(matches!(rx.try_recv().unwrap(), PlaybackEvent::AuthError(_)));
        assert!(api.actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_command_is_renewed_and_retried() {
        let api = FakeApi::default().rejecting("live");
        let (dispatcher, api) = setup(FakeProvider::default(), api, HOUR).await;

        dispatcher.execute(Command::Pause).await.unwrap();

        assert_eq!(api.tokens_seen(), vec!["live", "access-1"]);
        assert_eq!(api.actions(), vec![PlayerAction::Pause]);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("Play".parse::<Command>(), Ok(Command::Play));
        assert_eq!(" prev ".parse::<Command>(), Ok(Command::Previous));
        assert_eq!("+".parse::<Command>(), Ok(Command::VolumeUp));
        assert!("shuffle".parse::<Command>().is_err());
    }
}
