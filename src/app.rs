//! Application wiring: one token manager shared by the poller and the
//! command dispatcher, the console display, and re-authorization.

use anyhow::{bail, Result};
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::SpotifyClient;
use crate::auth::{self, Authorized, FileTokenStore, SpotifyOAuth, TokenManager, TokenStore};
use crate::config::Config;
use crate::display::ConsoleDisplay;
use crate::playback::{Command, CommandDispatcher, PlaybackEvent, Poller};

/// Delay before re-polling after a control command.
const POST_COMMAND_REFRESH: Duration = Duration::from_millis(300);

/// Shared handles for one process.
struct Session {
    store: Arc<dyn TokenStore>,
    manager: Arc<TokenManager<SpotifyOAuth>>,
    api: SpotifyClient,
}

impl Session {
    /// Build the session and load the startup token pair. Returns whether a
    /// usable refresh token was found.
    async fn open(config: &Config) -> Result<(Self, bool)> {
        let provider = SpotifyOAuth::from_config(config)?;
        let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(config.token_path()?));
        let manager = Arc::new(TokenManager::new(provider, Arc::clone(&store)));
        let api = SpotifyClient::new(config.request_timeout())?;

        let seeded = manager.seed(config.bootstrap_pair()).await;
        Ok((
            Self {
                store,
                manager,
                api,
            },
            seeded,
        ))
    }
}

/// One-shot control command (`play`, `pause`, ...).
pub async fn control(config: &Config, command: Command) -> Result<()> {
    let (session, seeded) = Session::open(config).await?;
    if !seeded {
        bail!("Not authorized. Run 'spotify-widget authorize' first.");
    }

    let dispatcher = CommandDispatcher::new(session.manager, session.api, config.volume_step);
    dispatcher.execute(command).await?;
    println!("{:?}: ok", command);
    Ok(())
}

/// Poll and display playback until Ctrl+C. Commands are read from stdin.
pub async fn run(config: &Config) -> Result<()> {
    let (session, seeded) = Session::open(config).await?;

    if !seeded {
        tracing::info!("No saved tokens, starting authorization flow");
        match auth::authorize_interactive(config, Arc::clone(&session.store)).await? {
            Some(authorized) => {
                session
                    .manager
                    .install(authorized.pair, authorized.expires_in)
                    .await
            }
            None => return Ok(()),
        }
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let poller = Poller::new(
        Arc::clone(&session.manager),
        session.api.clone(),
        config.poll_interval(),
        event_tx.clone(),
    );
    let control = poller.control();
    let dispatcher = Arc::new(
        CommandDispatcher::new(
            Arc::clone(&session.manager),
            session.api.clone(),
            config.volume_step,
        )
        .with_events(event_tx),
    );

    let poll_task = tokio::spawn(poller.run());
    let mut stdin = spawn_line_reader(BufReader::new(std::io::stdin()));
    let mut stdin_open = true;
    let mut display = ConsoleDisplay::default();
    let mut reauth: Option<JoinHandle<Result<Option<Authorized>>>> = None;

    println!("Commands: play, pause, next, prev, +, -, quit");

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                if let Some(line) = display.render(&event) {
                    println!("{}", line);
                }
                if matches!(event, PlaybackEvent::AuthError(_)) && reauth.is_none() {
                    let config = config.clone();
                    let store = Arc::clone(&session.store);
                    reauth = Some(tokio::spawn(async move {
                        auth::authorize_interactive(&config, store).await
                    }));
                }
            }
            Some(result) = join_reauth(&mut reauth) => {
                reauth = None;
                match result {
                    Ok(Ok(Some(authorized))) => {
                        session.manager.install(authorized.pair, authorized.expires_in).await;
                        control.resume();
                    }
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => tracing::error!("Re-authorization failed: {:#}", e),
                    Err(e) => tracing::error!("Re-authorization task failed: {}", e),
                }
            }
            line = stdin.recv(), if stdin_open => {
                match line {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) if line.trim() == "quit" => break,
                    Some(line) => match line.parse::<Command>() {
                        Ok(command) => {
                            let dispatcher = Arc::clone(&dispatcher);
                            let control = Arc::clone(&control);
                            tokio::spawn(async move {
                                if dispatcher.dispatch(command).await {
                                    tokio::time::sleep(POST_COMMAND_REFRESH).await;
                                    control.refresh_now();
                                }
                            });
                        }
                        Err(e) => println!("{}", e),
                    },
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }

    if let Some(task) = reauth {
        task.abort();
    }

    // Stop the poller after its current tick; an in-flight renewal is allowed
    // to finish so the saved pair stays consistent.
    drop(event_rx);
    control.refresh_now();
    control.resume();
    if let Err(e) = poll_task.await {
        tracing::warn!("Poller task failed: {}", e);
    }
    session.manager.wait_idle().await;
    Ok(())
}

/// Read lines on a dedicated thread. A blocking read can't be cancelled,
/// so it must stay off the runtime's blocking pool or shutdown waits on it.
fn spawn_line_reader<R: BufRead + Send + 'static>(reader: R) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Wait for the re-authorization task, or forever when there is none.
async fn join_reauth(
    task: &mut Option<JoinHandle<Result<Option<Authorized>>>>,
) -> Option<Result<Result<Option<Authorized>>, tokio::task::JoinError>> {
    match task {
        Some(handle) => Some(handle.await),
        None => std::future::pending().await,
    }
}
