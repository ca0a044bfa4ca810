//! OAuth2 authorization-code grant against the Spotify accounts service

use anyhow::{anyhow, Context, Result};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::AuthConfig;
use crate::config::Config;
use crate::error::Error;

/// Tokens returned by a code exchange or a refresh grant.
#[derive(Debug, Clone)]
pub struct GrantedTokens {
    pub access_token: String,
    /// Present only when the provider issued (or rotated) a refresh token.
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
}

/// The three provider operations the credential lifecycle relies on.
pub trait AuthProvider: Send + Sync {
    /// Authorization URL embedding the scope set and `state`.
    fn authorize_url(&self, state: &str) -> String;

    fn exchange_code(&self, code: &str) -> impl Future<Output = Result<GrantedTokens>> + Send;

    fn refresh(&self, refresh_token: &str) -> impl Future<Output = Result<GrantedTokens>> + Send;
}

impl<T: AuthProvider> AuthProvider for Arc<T> {
    fn authorize_url(&self, state: &str) -> String {
        (**self).authorize_url(state)
    }

    fn exchange_code(&self, code: &str) -> impl Future<Output = Result<GrantedTokens>> + Send {
        (**self).exchange_code(code)
    }

    fn refresh(&self, refresh_token: &str) -> impl Future<Output = Result<GrantedTokens>> + Send {
        (**self).refresh(refresh_token)
    }
}

/// Spotify accounts-service client (confidential client, basic auth).
#[derive(Clone)]
pub struct SpotifyOAuth {
    client: BasicClient,
    scopes: Vec<&'static str>,
    timeout: Duration,
}

impl SpotifyOAuth {
    /// Build the client from config. Fails with `Error::Configuration` when
    /// client credentials are absent.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Self::with_endpoints(config, AuthConfig::default())
    }

    /// Build the client against the given accounts-service endpoints.
    pub fn with_endpoints(config: &Config, auth_config: AuthConfig) -> Result<Self, Error> {
        let credentials = config.credentials()?;

        let auth_url = AuthUrl::new(auth_config.auth_url)
            .map_err(|e| Error::Configuration(format!("invalid authorize URL: {}", e)))?;
        let token_url = TokenUrl::new(auth_config.token_url)
            .map_err(|e| Error::Configuration(format!("invalid token URL: {}", e)))?;
        let redirect_url = RedirectUrl::new(config.redirect_uri())
            .map_err(|e| Error::Configuration(format!("invalid redirect URI: {}", e)))?;

        let client = BasicClient::new(
            ClientId::new(credentials.client_id),
            Some(ClientSecret::new(credentials.client_secret)),
            auth_url,
            Some(token_url),
        )
        .set_redirect_uri(redirect_url);

        Ok(Self {
            client,
            scopes: auth_config.scopes.to_vec(),
            timeout: config.request_timeout(),
        })
    }

    async fn with_timeout<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", what, self.timeout))?
    }
}

impl AuthProvider for SpotifyOAuth {
    fn authorize_url(&self, state: &str) -> String {
        let state = state.to_string();
        let (url, _csrf) = self
            .client
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(self.scopes.iter().map(|s| Scope::new(s.to_string())))
            .url();
        url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<GrantedTokens> {
        tracing::info!("Exchanging authorization code for tokens...");

        let request = async {
            let token_response = self
                .client
                .exchange_code(AuthorizationCode::new(code.to_string()))
                .request_async(oauth2::reqwest::async_http_client)
                .await
                .context("Failed to exchange authorization code")?;

            Ok(GrantedTokens {
                access_token: token_response.access_token().secret().to_string(),
                refresh_token: token_response
                    .refresh_token()
                    .map(|rt| rt.secret().to_string()),
                expires_in: token_response.expires_in(),
            })
        };
        self.with_timeout("Code exchange", request).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<GrantedTokens> {
        tracing::debug!("Requesting refresh grant...");

        let request = async {
            let token_response = self
                .client
                .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
                .request_async(oauth2::reqwest::async_http_client)
                .await
                .context("Failed to refresh access token")?;

            Ok(GrantedTokens {
                access_token: token_response.access_token().secret().to_string(),
                refresh_token: token_response
                    .refresh_token()
                    .map(|rt| rt.secret().to_string()),
                expires_in: token_response.expires_in(),
            })
        };
        self.with_timeout("Refresh grant", request).await
    }
}
