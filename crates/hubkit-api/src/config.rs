// Client configuration.
//
// Builds the underlying `reqwest::Client`. Redirects are handled
// manually by `ApiClient` (conditional headers must survive 307/308
// but be dropped on 303), so the built client never follows them.

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::Error;

const DEFAULT_API_URL: &str = "https://api.github.com/";
const DEFAULT_USER_AGENT: &str = concat!("hubkit/", env!("CARGO_PKG_VERSION"));
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for an [`ApiClient`](crate::ApiClient).
///
/// The defaults target the public GitHub API anonymously; point
/// `api_url` elsewhere for GitHub Enterprise instances.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Root of the REST API. All request paths are resolved against this.
    pub api_url: Url,
    /// Personal access token. Anonymous when absent (lower rate limits,
    /// no private resources).
    pub token: Option<SecretString>,
    /// Value of the `User-Agent` header. GitHub rejects requests without one.
    pub user_agent: String,
    /// Per-attempt timeout. `None` leaves reqwest's default (no timeout).
    pub timeout: Option<Duration>,
    /// Fixed delay between retries of transient failures.
    pub retry_backoff: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            // The constant is a valid absolute URL.
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL must parse"),
            token: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout: None,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl ApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authenticate every request with a personal access token.
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: Url) -> Self {
        self.api_url = api_url;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Build the `reqwest::Client` this configuration describes.
    pub(crate) fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github.v3+json"));

        if let Some(token) = &self.token {
            let mut value = HeaderValue::try_from(format!("Bearer {}", token.expose_secret()))
                .map_err(|_| Error::Config("access token is not a valid header value".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none());

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        builder.build().map_err(Error::Transport)
    }
}
