//! Error taxonomy for the credential lifecycle and the playback API.
//!
//! `ApiError` is produced by classifying HTTP responses at the API boundary.
//! `Error` is what callers of the token manager, the poller and the
//! dispatcher match on.

use thiserror::Error;

/// Classified failure of a single Spotify Web API call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 401: the access token is no longer accepted.
    #[error("access token rejected by Spotify")]
    Unauthorized,
    /// 204 where a body was expected (nothing is playing).
    #[error("no content")]
    NoContent,
    /// 429, with the `Retry-After` hint in seconds when present.
    #[error("rate limited (retry after {0:?}s)")]
    RateLimited(Option<u64>),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// Errors surfaced by the authorization flow and the token manager.
#[derive(Debug, Error)]
pub enum Error {
    /// Client credentials are missing. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The user or the provider refused the authorization step.
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),
    /// The authorization code could not be exchanged. Codes are single-use,
    /// so the flow has to be restarted.
    #[error("authorization code exchange failed: {0}")]
    GrantExchangeFailed(String),
    /// No refresh token in memory or in the token store.
    #[error("no refresh token available, re-authorization required")]
    MissingRefreshToken,
    /// Renewal gave up, or a renewed token was rejected again.
    #[error("re-authorization required: {0}")]
    AuthFatal(String),
    /// Transient provider error. Reported, never fatal.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    /// True for errors that stop all authenticated work until the user
    /// authorizes again.
    pub fn is_auth_fatal(&self) -> bool {
        matches!(self, Error::MissingRefreshToken | Error::AuthFatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_fatal_classification() {
        assert!(Error::MissingRefreshToken.is_auth_fatal());
        assert!(Error::AuthFatal("gave up".into()).is_auth_fatal());
        assert!(!Error::Api(ApiError::Unauthorized).is_auth_fatal());
        assert!(!Error::GrantExchangeFailed("invalid_grant".into()).is_auth_fatal());
    }

    #[test]
    fn test_api_error_is_transparent() {
        let err = Error::from(ApiError::Status {
            status: 502,
            body: "bad gateway".into(),
        });
        assert_eq!(err.to_string(), "HTTP 502: bad gateway");
    }
}
