//! Authentication module for the Spotify Web API
//!
//! Implements the OAuth2 authorization-code flow against the Spotify
//! accounts service and keeps the resulting access token valid for as long
//! as the process runs.

pub mod flow;
pub mod lifecycle;
pub mod oauth;
pub mod tokens;

pub use flow::{bind_loopback, AuthorizationFlow, Authorized};
pub use lifecycle::TokenManager;
pub use oauth::{AuthProvider, GrantedTokens, SpotifyOAuth};
pub use tokens::{FileTokenStore, StoredTokens, TokenPair, TokenStore};

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;

/// Spotify accounts-service endpoints and the scope set requested
pub struct AuthConfig {
    pub auth_url: String,
    pub token_url: String,
    pub scopes: &'static [&'static str],
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.spotify.com/authorize".into(),
            token_url: "https://accounts.spotify.com/api/token".into(),
            scopes: &[
                "user-read-playback-state",
                "user-modify-playback-state",
                "user-read-currently-playing",
                "user-read-recently-played",
                "user-top-read",
                "user-read-playback-position",
                "streaming",
                "user-read-email",
                "user-read-private",
            ],
        }
    }
}

/// Build the authorization flow for `config`, writing into `store`.
pub fn authorization_flow(
    config: &Config,
    store: Arc<dyn TokenStore>,
) -> Result<AuthorizationFlow<SpotifyOAuth>> {
    let provider = SpotifyOAuth::from_config(config)?;
    let credentials = config.credentials()?;
    Ok(AuthorizationFlow::new(
        provider,
        store,
        credentials,
        config.redirect_uri(),
    ))
}

/// Run the browser authorization flow until it succeeds (or Ctrl+C).
/// Returns `None` on Ctrl+C.
pub async fn authorize_interactive(
    config: &Config,
    store: Arc<dyn TokenStore>,
) -> Result<Option<Authorized>> {
    let flow = authorization_flow(config, store)?;
    let listener = bind_loopback(config.redirect_port).await?;

    println!();
    println!("To authorize, open: http://127.0.0.1:{}", config.redirect_port);
    println!("Redirect URI:       {}", config.redirect_uri());
    println!();

    let authorized = tokio::select! {
        result = flow.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("Authorization cancelled.");
            return Ok(None);
        }
    };

    println!("Authorization successful. Add this to your config.toml to pin the tokens:");
    println!();
    println!("{}", flow.snippet(&authorized.pair));
    Ok(Some(authorized))
}

/// `authorize` command
pub async fn authorize(config: &Config) -> Result<()> {
    let store = Arc::new(FileTokenStore::new(config.token_path()?));
    if authorize_interactive(config, store.clone()).await?.is_some() {
        println!("Tokens saved to {}", store.path().display());
    }
    Ok(())
}

/// Clear stored credentials
pub async fn logout(config: &Config) -> Result<()> {
    let store = FileTokenStore::new(config.token_path()?);
    store.clear()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status(config: &Config) -> Result<()> {
    match config.credentials() {
        Ok(creds) => {
            let prefix: String = creds.client_id.chars().take(8).collect();
            println!("Client:      {}...", prefix);
        }
        Err(e) => println!("Client:      {}", e),
    }

    let store = FileTokenStore::new(config.token_path()?);
    println!("Token file:  {}", store.path().display());
    match store.load()? {
        Some(tokens) => {
            println!("Saved at:    {}", tokens.saved_at);
            if tokens.refresh_token.is_empty() {
                println!("Refresh tok: none");
            } else {
                println!("Refresh tok: present");
            }
        }
        None if config.bootstrap_pair().is_some() => {
            println!("Refresh tok: from config.toml (not yet saved)");
        }
        None => {
            println!("Refresh tok: none");
            println!("\nRun 'spotify-widget authorize' to authenticate.");
        }
    }

    Ok(())
}
