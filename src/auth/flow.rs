//! Authorization-code flow: begin, callback, persist.
//!
//! The browser side runs against a tiny loopback HTTP endpoint. It is the only
//! inbound network surface of the process and binds to 127.0.0.1 only.

use anyhow::{Context, Result};
use oauth2::CsrfToken;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time;

use super::oauth::{AuthProvider, GrantedTokens};
use super::tokens::{StoredTokens, TokenPair, TokenStore};
use crate::config::{config_snippet, Credentials};
use crate::error::Error;

/// Limit for reading a request from, or writing a response to, the browser.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters of the provider's redirect.
#[derive(Debug, Default, Clone)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub state: Option<String>,
}

impl CallbackParams {
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

/// A completed authorization: the persisted pair plus its lifetime.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub pair: TokenPair,
    pub expires_in: Option<Duration>,
}

pub struct AuthorizationFlow<P> {
    provider: P,
    store: Arc<dyn TokenStore>,
    credentials: Credentials,
    redirect_uri: String,
    pending_state: Mutex<Option<String>>,
}

impl<P: AuthProvider> AuthorizationFlow<P> {
    pub fn new(
        provider: P,
        store: Arc<dyn TokenStore>,
        credentials: Credentials,
        redirect_uri: String,
    ) -> Self {
        Self {
            provider,
            store,
            credentials,
            redirect_uri,
            pending_state: Mutex::new(None),
        }
    }

    /// Step 1: authorization URL with a fresh anti-replay state value.
    pub fn begin(&self) -> String {
        let state = CsrfToken::new_random().secret().to_string();
        let url = self.provider.authorize_url(&state);
        *self.pending_state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state);
        url
    }

    /// Step 2: validate the redirect and exchange the code. Never retried;
    /// the pending state is consumed either way.
    pub async fn callback(&self, params: &CallbackParams) -> Result<GrantedTokens, Error> {
        if let Some(reason) = &params.error {
            tracing::warn!("Authorization denied by provider: {}", reason);
            return Err(Error::AuthorizationDenied(reason.clone()));
        }

        let expected = self
            .pending_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match (&expected, &params.state) {
            (Some(expected), Some(got)) if expected == got => {}
            (None, _) => {
                return Err(Error::AuthorizationDenied(
                    "no authorization in progress".into(),
                ))
            }
            _ => return Err(Error::AuthorizationDenied("state mismatch".into())),
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::AuthorizationDenied("missing authorization code".into()))?;

        let granted = self
            .provider
            .exchange_code(code)
            .await
            .map_err(|e| Error::GrantExchangeFailed(format!("{:#}", e)))?;

        if granted.refresh_token.as_deref().map_or(true, str::is_empty) {
            return Err(Error::GrantExchangeFailed(
                "provider returned no refresh token".into(),
            ));
        }
        Ok(granted)
    }

    /// Step 3: write the new pair to the token store.
    pub fn persist(&self, granted: GrantedTokens) -> Result<Authorized> {
        let pair = TokenPair::new(
            granted.access_token,
            granted.refresh_token.unwrap_or_default(),
        );
        self.store
            .save(&StoredTokens::from(&pair))
            .context("Failed to persist authorized tokens")?;
        tracing::info!("Authorization complete, tokens saved");

        Ok(Authorized {
            pair,
            expires_in: granted.expires_in,
        })
    }

    /// Configuration snippet for the operator.
    pub fn snippet(&self, pair: &TokenPair) -> String {
        config_snippet(&self.credentials, pair)
    }

    /// Route one request of the loopback endpoint.
    pub async fn handle(&self, target: &str) -> (Response, Option<Authorized>) {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        match path {
            "/" => (Response::html(200, self.landing_page()), None),
            "/authorize" => {
                let url = self.begin();
                tracing::info!("Redirecting browser to Spotify...");
                (Response::redirect(url), None)
            }
            "/callback" => self.handle_callback(query).await,
            _ => (Response::html(404, page("Not Found", "<p>Nothing here.</p>")), None),
        }
    }

    async fn handle_callback(&self, query: &str) -> (Response, Option<Authorized>) {
        let params = CallbackParams::from_query(query);
        let granted = match self.callback(&params).await {
            Ok(granted) => granted,
            Err(e) => {
                tracing::warn!("Authorization failed: {}", e);
                let status = match e {
                    Error::GrantExchangeFailed(_) => 500,
                    _ => 400,
                };
                return (Response::html(status, failure_page(&e.to_string())), None);
            }
        };

        match self.persist(granted) {
            Ok(authorized) => {
                let snippet = self.snippet(&authorized.pair);
                let body = format!(
                    "<h1>Authorization successful</h1>\
                     <p>Tokens have been saved. To pin them in your configuration, add:</p>\
                     <pre><code>{}</code></pre>\
                     <p>You can close this window.</p>",
                    escape_html(&snippet)
                );
                (Response::html(200, page("Authorized", &body)), Some(authorized))
            }
            Err(e) => {
                tracing::error!("{:#}", e);
                (Response::html(500, failure_page(&format!("{:#}", e))), None)
            }
        }
    }

    fn landing_page(&self) -> String {
        let id_prefix: String = self.credentials.client_id.chars().take(8).collect();
        let body = format!(
            "<h1>Spotify authorization</h1>\
             <p>Client ID: <code>{}...</code><br>Redirect URI: <code>{}</code></p>\
             <p><a href=\"/authorize\">Connect with Spotify</a></p>",
            escape_html(&id_prefix),
            escape_html(&self.redirect_uri)
        );
        page("Spotify authorization", &body)
    }

    /// Serve the loopback endpoint until one authorization succeeds.
    ///
    /// Requests are read concurrently, so an idle connection (browsers open
    /// speculative ones) never holds up the callback.
    pub async fn serve(&self, listener: TcpListener) -> Result<Authorized> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.context("Accept failed")?;
                    tracing::debug!("Redirect endpoint connection from {}", peer);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match time::timeout(REQUEST_TIMEOUT, read_request(stream)).await {
                            Ok(Ok(request)) => {
                                let _ = tx.send(request);
                            }
                            Ok(Err(e)) => {
                                tracing::warn!("Redirect endpoint request failed: {:#}", e)
                            }
                            Err(_) => tracing::debug!("Dropping idle connection from {}", peer),
                        }
                    });
                }
                Some((stream, target)) = rx.recv() => {
                    match self.respond(stream, target).await {
                        Ok(Some(authorized)) => return Ok(authorized),
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Redirect endpoint request failed: {:#}", e),
                    }
                }
            }
        }
    }

    async fn respond(
        &self,
        mut stream: TcpStream,
        target: Option<String>,
    ) -> Result<Option<Authorized>> {
        let (response, authorized) = match target {
            Some(target) => self.handle(&target).await,
            None => (Response::html(405, page("Method Not Allowed", "")), None),
        };

        let write = async {
            stream.write_all(response.to_http().as_bytes()).await?;
            stream.shutdown().await
        };
        match time::timeout(REQUEST_TIMEOUT, write).await {
            Ok(result) => result.context("Failed to write response")?,
            Err(_) => tracing::debug!("Timed out writing response"),
        }
        Ok(authorized)
    }
}

/// Read one request and return its GET target (`None` for other methods).
async fn read_request(mut stream: TcpStream) -> Result<(TcpStream, Option<String>)> {
    let mut buf = [0u8; 8192];
    let n = stream.read(&mut buf).await.context("Failed to read request")?;
    let request = String::from_utf8_lossy(&buf[..n]);

    // Request line, e.g. "GET /callback?code=... HTTP/1.1"
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let target = match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Some(target.to_string()),
        _ => None,
    };
    Ok((stream, target))
}

/// Bind the redirect endpoint on the loopback interface.
pub async fn bind_loopback(port: u16) -> Result<TcpListener> {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .await
        .with_context(|| format!("Failed to bind 127.0.0.1:{}", port))
}

/// Minimal HTTP response for the loopback endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub location: Option<String>,
    pub body: String,
}

impl Response {
    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            location: None,
            body,
        }
    }

    fn redirect(location: String) -> Self {
        Self {
            status: 302,
            location: Some(location),
            body: String::new(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            302 => "Found",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            _ => "Internal Server Error",
        }
    }

    pub fn to_http(&self) -> String {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason());
        if let Some(location) = &self.location {
            head.push_str(&format!("Location: {}\r\n", location));
        }
        format!(
            "{}Content-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            head,
            self.body.len(),
            self.body
        )
    }
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title></head>\
         <body style=\"font-family: sans-serif; background: #191414; color: #fff; padding: 40px\">{}</body></html>",
        escape_html(title),
        body
    )
}

fn failure_page(message: &str) -> String {
    page(
        "Authorization failed",
        &format!(
            "<h1>Authorization failed</h1><pre>{}</pre><p><a href=\"/\">Try again</a></p>",
            escape_html(message)
        ),
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}
